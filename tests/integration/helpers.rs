//! Shared helpers for integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use voicelink::directive::{Directive, DirectiveEvent, DirectiveResult, Header};

/// Build a directive with a fixed message id so tests can follow it.
pub(crate) fn directive(
    namespace: &str,
    name: &str,
    dialog: &str,
    message_id: &str,
    payload: serde_json::Value,
) -> Directive {
    Directive::new(
        Header {
            namespace: namespace.into(),
            name: name.into(),
            dialog_request_id: dialog.into(),
            message_id: message_id.into(),
        },
        payload,
    )
}

/// Wait for the completion of `message_id`, skipping other events.
pub(crate) async fn completion(
    events: &mut broadcast::Receiver<DirectiveEvent>,
    message_id: &str,
) -> DirectiveResult {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let DirectiveEvent::Completed { header, result } = events.recv().await.unwrap() {
                if header.message_id == message_id {
                    return result;
                }
            }
        }
    })
    .await
    .expect("timed out waiting for completion")
}

/// A shared, ordered log of what callbacks observed.
#[derive(Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
