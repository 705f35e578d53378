//! Directive sequencing across several capabilities.

use crate::helpers::{Journal, completion, directive};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use voicelink::config::DirectiveConfig;
use voicelink::directive::{
    BlockingPolicy, Directive, DirectiveHandler, DirectiveOutcome, DirectiveResult,
    DirectiveSequencer, DirectiveTypeInfo, ResourceClass,
};
use voicelink::error::{DirectiveError, HandlerError};
use voicelink::telemetry::{ChannelTelemetry, TracingTelemetry};

#[derive(Debug, Deserialize)]
struct SpeakPayload {
    text: String,
}

/// Speaks until released through `done`.
struct SpeechCapability {
    journal: Journal,
    done: Arc<Notify>,
}

#[async_trait]
impl DirectiveHandler for SpeechCapability {
    async fn prefetch(&self, directive: &Directive) -> Result<(), HandlerError> {
        let payload: SpeakPayload = directive.payload_as()?;
        if payload.text.is_empty() {
            return Err(HandlerError::new("nothing to say"));
        }
        Ok(())
    }

    async fn handle(&self, directive: Directive) -> Result<DirectiveOutcome, HandlerError> {
        self.journal.push(format!("start:{}", directive.header.message_id));
        self.done.notified().await;
        self.journal.push(format!("end:{}", directive.header.message_id));
        Ok(DirectiveOutcome::Finished)
    }
}

struct DisplayCapability {
    journal: Journal,
}

#[async_trait]
impl DirectiveHandler for DisplayCapability {
    async fn handle(&self, directive: Directive) -> Result<DirectiveOutcome, HandlerError> {
        self.journal.push(format!("show:{}", directive.header.message_id));
        Ok(DirectiveOutcome::Finished)
    }
}

async fn pipeline(journal: &Journal, done: &Arc<Notify>) -> DirectiveSequencer {
    let sequencer = DirectiveSequencer::spawn(&DirectiveConfig::default(), Arc::new(TracingTelemetry));
    sequencer
        .add_handlers(
            vec![
                DirectiveTypeInfo::new("TTS", "Speak", BlockingPolicy::blocking(ResourceClass::Audio)),
                DirectiveTypeInfo::new(
                    "AudioPlayer",
                    "Play",
                    BlockingPolicy::blocking(ResourceClass::Audio),
                ),
            ],
            Arc::new(SpeechCapability {
                journal: journal.clone(),
                done: Arc::clone(done),
            }),
        )
        .await
        .unwrap();
    sequencer
        .add_handler(
            DirectiveTypeInfo::new("Display", "Show", BlockingPolicy::non_blocking(ResourceClass::Visual)),
            Arc::new(DisplayCapability {
                journal: journal.clone(),
            }),
        )
        .await
        .unwrap();
    sequencer
}

#[tokio::test]
async fn audio_directives_serialize_while_display_runs_alongside() {
    let journal = Journal::default();
    let done = Arc::new(Notify::new());
    let sequencer = pipeline(&journal, &done).await;
    let mut events = sequencer.subscribe();

    sequencer
        .submit(directive("TTS", "Speak", "d1", "speak", serde_json::json!({"text": "hello"})))
        .await
        .unwrap();
    sequencer
        .submit(directive("AudioPlayer", "Play", "d1", "play", serde_json::json!({"text": "song"})))
        .await
        .unwrap();
    sequencer
        .submit(directive("Display", "Show", "d1", "card", serde_json::json!({})))
        .await
        .unwrap();

    assert_eq!(completion(&mut events, "card").await, DirectiveResult::Finished);
    assert_eq!(journal.entries(), vec!["start:speak", "show:card"]);

    done.notify_one();
    assert_eq!(completion(&mut events, "speak").await, DirectiveResult::Finished);
    tokio::time::sleep(Duration::from_millis(20)).await;
    done.notify_one();
    assert_eq!(completion(&mut events, "play").await, DirectiveResult::Finished);

    assert_eq!(
        journal.entries(),
        vec!["start:speak", "show:card", "end:speak", "start:play", "end:play"]
    );
}

#[tokio::test]
async fn bad_directives_are_isolated() {
    let journal = Journal::default();
    let done = Arc::new(Notify::new());
    let (telemetry, mut reports) = ChannelTelemetry::new();
    let sequencer = DirectiveSequencer::spawn(&DirectiveConfig::default(), Arc::new(telemetry));
    sequencer
        .add_handler(
            DirectiveTypeInfo::new("TTS", "Speak", BlockingPolicy::blocking(ResourceClass::Audio)),
            Arc::new(SpeechCapability {
                journal: journal.clone(),
                done: Arc::clone(&done),
            }),
        )
        .await
        .unwrap();
    let mut events = sequencer.subscribe();

    sequencer
        .submit(directive("Alerts", "SetAlert", "d1", "alert", serde_json::json!({})))
        .await
        .unwrap();
    sequencer
        .submit(directive("TTS", "Speak", "d1", "garbled", serde_json::json!({"txt": 1})))
        .await
        .unwrap();
    sequencer
        .submit(directive("TTS", "Speak", "d1", "ok", serde_json::json!({"text": "hi"})))
        .await
        .unwrap();

    done.notify_one();
    assert_eq!(completion(&mut events, "ok").await, DirectiveResult::Finished);
    assert_eq!(journal.entries(), vec!["start:ok", "end:ok"]);

    let first = reports.recv().await.unwrap();
    assert_eq!(first.header.message_id, "alert");
    assert_eq!(
        first.error,
        DirectiveError::HandlerNotFound {
            directive_type: "Alerts.SetAlert".into()
        }
    );
    let second = reports.recv().await.unwrap();
    assert_eq!(second.header.message_id, "garbled");
    assert!(matches!(second.error, DirectiveError::PrefetchFailed { .. }));
    assert!(reports.try_recv().is_err());
}
