//! Directive records, capability handler contract and lifecycle events.
//!
//! Directives arrive from the transport layer in order and are dispatched by
//! the [`DirectiveSequencer`] to the [`DirectiveHandler`] registered for their
//! `namespace.name` type.

pub mod sequencer;

use crate::error::HandlerError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use sequencer::{DirectiveSequencer, SequencerTask};

/// Routing and correlation data shared by directives and attachments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub namespace: String,
    pub name: String,
    pub dialog_request_id: String,
    pub message_id: String,
}

impl Header {
    /// Build a header with a fresh message id.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        dialog_request_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            dialog_request_id: dialog_request_id.into(),
            message_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// `namespace.name`, the key handlers are registered under.
    #[must_use]
    pub fn directive_type(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// A command received from the server. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub header: Header,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Directive {
    pub fn new(header: Header, payload: serde_json::Value) -> Self {
        Self { header, payload }
    }

    #[must_use]
    pub fn directive_type(&self) -> String {
        self.header.directive_type()
    }

    /// Deserialize the payload into a handler-specific type.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] when the payload does not match `P`.
    pub fn payload_as<P: serde::de::DeserializeOwned>(&self) -> Result<P, HandlerError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// A binary chunk belonging to an earlier directive (e.g. streamed TTS audio).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub header: Header,
    /// Message id of the directive this chunk belongs to.
    pub parent_message_id: String,
    pub seq: u32,
    pub is_end: bool,
    pub content: Bytes,
}

/// The resource a directive occupies while it is handled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    #[default]
    None,
    Audio,
    Visual,
    /// Every class at once.
    Any,
    Custom(String),
}

impl ResourceClass {
    /// Whether directives of the two classes contend for a resource.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self == other || *self == Self::Any || *other == Self::Any
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Audio => f.write_str("audio"),
            Self::Visual => f.write_str("visual"),
            Self::Any => f.write_str("any"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// How a directive type shares its resource class with others.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockingPolicy {
    pub resource_class: ResourceClass,
    /// Blocking directives run one at a time within their class.
    pub is_blocking: bool,
}

impl BlockingPolicy {
    #[must_use]
    pub fn blocking(resource_class: ResourceClass) -> Self {
        Self {
            resource_class,
            is_blocking: true,
        }
    }

    #[must_use]
    pub fn non_blocking(resource_class: ResourceClass) -> Self {
        Self {
            resource_class,
            is_blocking: false,
        }
    }
}

/// A directive type a capability handles, with its blocking policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectiveTypeInfo {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub policy: BlockingPolicy,
}

impl DirectiveTypeInfo {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, policy: BlockingPolicy) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            policy,
        }
    }

    #[must_use]
    pub fn directive_type(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// Which of a dialog's remaining directives a stop cancels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPolicy {
    pub cancel_all: bool,
    /// `namespace.name` types to cancel when `cancel_all` is off.
    #[serde(default)]
    pub targets: Vec<String>,
}

impl CancelPolicy {
    /// Cancel everything left in the dialog.
    #[must_use]
    pub fn all() -> Self {
        Self {
            cancel_all: true,
            targets: Vec::new(),
        }
    }

    /// Cancel only the listed directive types.
    pub fn targets<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cancel_all: false,
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn matches(&self, directive_type: &str) -> bool {
        self.cancel_all || self.targets.iter().any(|t| t == directive_type)
    }
}

/// How a handler finished a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveOutcome {
    /// Ran to completion.
    Finished,
    /// Stopped early; the dialog's remaining directives that the policy
    /// names are cancelled.
    Stopped(CancelPolicy),
}

/// Terminal result of one directive, as published in [`DirectiveEvent::Completed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveResult {
    Finished,
    Stopped,
    Canceled,
    Failed(String),
}

/// Directive lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveEvent {
    WillPrefetch { header: Header },
    WillHandle { header: Header },
    /// Held in its class's pending-blocked queue.
    Blocked {
        header: Header,
        resource_class: ResourceClass,
    },
    Completed {
        header: Header,
        result: DirectiveResult,
    },
}

/// A capability that handles one or more directive types.
///
/// `prefetch` runs strictly in arrival order, one directive at a time, so it
/// should only validate and parse. `handle` may run concurrently with other
/// directives and may take as long as the action takes.
#[async_trait]
pub trait DirectiveHandler: Send + Sync + 'static {
    async fn prefetch(&self, _directive: &Directive) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn handle(&self, directive: Directive) -> Result<DirectiveOutcome, HandlerError>;

    /// Binary data for a directive this handler received.
    fn handle_attachment(&self, _attachment: Attachment) {}

    /// A directive this handler prefetched was cancelled before `handle`.
    ///
    /// Drop whatever `prefetch` prepared for it.
    fn cancel(&self, _directive: &Directive) {}
}
