//! Error types for the voicelink SDK core.

/// Errors returned to a specific shared-buffer writer or reader.
///
/// These never propagate to unrelated readers: each one travels back through
/// the completion path of the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// The writer handle is not the buffer's current writer.
    #[error("write permission denied: writer has been superseded")]
    WritePermissionDenied,

    /// The stream has ended and no element exists at the reader's cursor.
    #[error("writer finished")]
    WriterFinished,

    /// The reader fell more than `capacity` elements behind the writer.
    ///
    /// Only produced when the buffer uses [`OverrunPolicy::Report`].
    ///
    /// [`OverrunPolicy::Report`]: crate::audio::shared_buffer::OverrunPolicy::Report
    #[error("reader overrun: {lagged} elements were overwritten")]
    Overrun {
        /// Number of elements the reader skipped.
        lagged: u64,
    },
}

/// Error reported by a capability handler from its prefetch or handle step.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    /// Create a handler error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a handler error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::with_source("invalid directive payload", e)
    }
}

/// Errors produced by the directive sequencer.
///
/// Per-directive variants are isolated to one directive and surfaced to the
/// telemetry collaborator; they never halt the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectiveError {
    /// No capability is registered for the directive type.
    #[error("no handler registered for {directive_type}")]
    HandlerNotFound {
        /// `namespace.name` of the directive.
        directive_type: String,
    },

    /// The handler rejected the directive while prefetching.
    #[error("prefetch failed for {directive_type}: {reason}")]
    PrefetchFailed {
        directive_type: String,
        reason: String,
    },

    /// The handler reported a failure while handling.
    #[error("handle failed for {directive_type}: {reason}")]
    HandleFailed {
        directive_type: String,
        reason: String,
    },

    /// Another handler already claims the directive type.
    #[error("a handler is already registered for {directive_type}")]
    DuplicateRegistration { directive_type: String },

    /// Removal of a directive type that was never registered.
    #[error("directive type {directive_type} is not registered")]
    TypeNotFound { directive_type: String },

    /// The sequencer is shut down and no longer accepts requests.
    #[error("directive sequencer closed")]
    Closed,
}

/// Top-level error type for the SDK core.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    /// Shared audio buffer error.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Directive registration or dispatch error.
    #[error("directive error: {0}")]
    Directive(#[from] DirectiveError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Audio source error.
    #[error("audio error: {0}")]
    Audio(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SdkError>;
