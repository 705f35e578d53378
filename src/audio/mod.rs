//! Audio frames, the shared fan-out buffer, and the source pump.

pub mod shared_buffer;
pub mod source;

use std::sync::Arc;
use std::time::{Duration, Instant};

pub use shared_buffer::{OverrunPolicy, Reader, SharedBuffer, Writer};

/// A chunk of mono audio captured from the microphone.
///
/// Samples sit behind an `Arc` so every reader of the shared buffer gets the
/// same allocation.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples at `sample_rate`.
    pub samples: Arc<[f32]>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Timestamp when this frame was captured.
    pub captured_at: Instant,
}

impl AudioFrame {
    /// Wrap captured samples, stamping them with the current time.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            captured_at: Instant::now(),
        }
    }

    /// Playback duration of the frame.
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.samples.len() as u64 * 1_000_000_000 / u64::from(self.sample_rate))
    }

    /// RMS energy of the samples.
    #[must_use]
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }
}
