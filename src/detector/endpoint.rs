//! Energy-based end-point detection.
//!
//! Uses RMS energy thresholding to find where an utterance starts and ends.
//! Stands in for a native end-point engine on platforms without one.

use crate::audio::AudioFrame;
use crate::config::EndpointConfig;
use crate::detector::{DetectionEngine, Detection};
use crate::error::Result;
use std::time::Duration;
use tracing::info;

/// End-point detector using RMS energy thresholding.
pub struct EnergyEndpointEngine {
    threshold: f32,
    min_speech: Duration,
    min_silence: Duration,
    timeout: Duration,
    /// Whether speech start has been reported.
    in_speech: bool,
    /// Consecutive speech before a start is reported.
    speech_run: Duration,
    /// Consecutive silence since the last speech frame.
    silence_run: Duration,
    /// Audio seen before speech started.
    waited: Duration,
}

impl EnergyEndpointEngine {
    pub fn new(config: &EndpointConfig) -> Self {
        info!(
            threshold = config.threshold,
            min_speech_ms = config.min_speech_ms,
            min_silence_ms = config.min_silence_ms,
            timeout_ms = config.timeout_ms,
            "endpoint detector initialized"
        );
        Self {
            threshold: config.threshold,
            min_speech: Duration::from_millis(u64::from(config.min_speech_ms)),
            min_silence: Duration::from_millis(u64::from(config.min_silence_ms)),
            timeout: Duration::from_millis(u64::from(config.timeout_ms)),
            in_speech: false,
            speech_run: Duration::ZERO,
            silence_run: Duration::ZERO,
            waited: Duration::ZERO,
        }
    }
}

impl DetectionEngine for EnergyEndpointEngine {
    fn process(&mut self, frame: &AudioFrame) -> Result<Option<Detection>> {
        let length = frame.duration();
        let is_speech = frame.rms() > self.threshold;

        if !self.in_speech {
            self.waited += length;
            if is_speech {
                self.speech_run += length;
                if self.speech_run >= self.min_speech {
                    self.in_speech = true;
                    self.silence_run = Duration::ZERO;
                    return Ok(Some(Detection::SpeechStart));
                }
            } else {
                self.speech_run = Duration::ZERO;
            }
            if self.waited >= self.timeout {
                return Ok(Some(Detection::Timeout));
            }
            return Ok(None);
        }

        if is_speech {
            self.silence_run = Duration::ZERO;
        } else {
            self.silence_run += length;
            if self.silence_run >= self.min_silence {
                self.in_speech = false;
                return Ok(Some(Detection::SpeechEnd));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.in_speech = false;
        self.speech_run = Duration::ZERO;
        self.silence_run = Duration::ZERO;
        self.waited = Duration::ZERO;
    }
}
