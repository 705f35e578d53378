//! Detection engines consuming the shared audio buffer.
//!
//! Wake-word and end-point engines are opaque functions of a frame sequence.
//! A [`DetectorRunner`] drives one engine from its own buffer [`Reader`] at
//! the engine's pace and broadcasts what it detects.

pub mod endpoint;

use crate::audio::{AudioFrame, Reader};
use crate::error::{BufferError, Result, SdkError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use endpoint::EnergyEndpointEngine;

/// Something an engine recognised in the audio stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// The user started speaking.
    SpeechStart,
    /// The user stopped speaking.
    SpeechEnd,
    /// No speech arrived in time.
    Timeout,
    /// A wake word was spotted.
    Keyword(String),
}

impl Detection {
    /// Whether the runner stops after reporting this detection.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::SpeechStart)
    }
}

/// Why a runner stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Detected,
    Cancelled,
    StreamFinished,
    Failed(String),
}

/// Notifications broadcast by a [`DetectorRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorEvent {
    Detected(Detection),
    Stopped(StopReason),
}

/// A frame-by-frame detector.
pub trait DetectionEngine: Send + 'static {
    /// Feed one frame; returns a detection when one completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot process the frame.
    fn process(&mut self, frame: &AudioFrame) -> Result<Option<Detection>>;

    /// Forget all state, e.g. after the reader skipped overwritten frames.
    fn reset(&mut self) {}
}

/// Drives a [`DetectionEngine`] from a shared-buffer reader.
pub struct DetectorRunner<E> {
    engine: E,
    reader: Reader<AudioFrame>,
    events: broadcast::Sender<DetectorEvent>,
}

impl<E: DetectionEngine> DetectorRunner<E> {
    pub fn new(engine: E, reader: Reader<AudioFrame>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            engine,
            reader,
            events,
        }
    }

    /// Subscribe before calling [`run`](Self::run) to see every event.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DetectorEvent> {
        self.events.subscribe()
    }

    /// Read frames until a terminal detection, the end of the stream, or
    /// cancellation.
    ///
    /// # Errors
    ///
    /// Returns the engine's error after broadcasting [`StopReason::Failed`].
    pub async fn run(mut self, cancel: CancellationToken) -> Result<StopReason> {
        info!("detector started");
        let mut frames: u64 = 0;

        let reason = loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => break StopReason::Cancelled,
                read = self.reader.read() => read,
            };

            let frame = match read {
                Ok(frame) => frame,
                Err(BufferError::WriterFinished) => break StopReason::StreamFinished,
                Err(BufferError::Overrun { lagged }) => {
                    warn!(lagged, "detector fell behind the writer, resetting engine");
                    self.engine.reset();
                    continue;
                }
                Err(e) => break StopReason::Failed(e.to_string()),
            };
            frames += 1;

            match self.engine.process(&frame) {
                Ok(Some(detection)) => {
                    debug!(?detection, frames, "detection");
                    let terminal = detection.is_terminal();
                    let _ = self.events.send(DetectorEvent::Detected(detection));
                    if terminal {
                        break StopReason::Detected;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    let reason = StopReason::Failed(e.to_string());
                    let _ = self.events.send(DetectorEvent::Stopped(reason));
                    info!(frames, "detector failed");
                    return Err(e);
                }
            }
        };

        info!(frames, ?reason, "detector stopped");
        let _ = self.events.send(DetectorEvent::Stopped(reason.clone()));
        if let StopReason::Failed(message) = &reason {
            return Err(SdkError::Audio(message.clone()));
        }
        Ok(reason)
    }
}
