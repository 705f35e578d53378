//! Error reporting sink for the directive sequencer.
//!
//! Reports are fire-and-forget: implementations run on the sequencer's
//! coordination task and must return immediately.

use crate::directive::Header;
use crate::error::DirectiveError;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// A structured report about one directive that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub header: Header,
    pub error: DirectiveError,
}

/// Receiver of per-directive error reports.
pub trait Telemetry: Send + Sync + 'static {
    fn report(&self, report: ErrorReport);
}

/// Writes reports to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn report(&self, report: ErrorReport) {
        let ErrorReport { header, error } = report;
        match &error {
            DirectiveError::HandlerNotFound { .. } => warn!(
                message_id = %header.message_id,
                dialog_request_id = %header.dialog_request_id,
                %error,
                "directive dropped"
            ),
            _ => error!(
                message_id = %header.message_id,
                dialog_request_id = %header.dialog_request_id,
                %error,
                "directive failed"
            ),
        }
    }
}

/// Forwards reports into an unbounded channel, e.g. for an uploader task.
#[derive(Debug, Clone)]
pub struct ChannelTelemetry {
    tx: mpsc::UnboundedSender<ErrorReport>,
}

impl ChannelTelemetry {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ErrorReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Telemetry for ChannelTelemetry {
    fn report(&self, report: ErrorReport) {
        if self.tx.send(report).is_err() {
            warn!("telemetry receiver dropped, discarding error report");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn channel_telemetry_forwards_reports() {
        let (telemetry, mut rx) = ChannelTelemetry::new();
        let header = Header::new("TTS", "Speak", "d1");
        telemetry.report(ErrorReport {
            header: header.clone(),
            error: DirectiveError::HandlerNotFound {
                directive_type: header.directive_type(),
            },
        });

        let report = rx.try_recv().unwrap();
        assert_eq!(report.header, header);
        assert!(matches!(report.error, DirectiveError::HandlerNotFound { .. }));
    }

    #[test]
    fn closed_channel_does_not_panic() {
        let (telemetry, rx) = ChannelTelemetry::new();
        drop(rx);
        telemetry.report(ErrorReport {
            header: Header::new("A", "B", "d"),
            error: DirectiveError::Closed,
        });
    }
}
