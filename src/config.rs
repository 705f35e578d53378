//! Configuration types for the SDK core.

use crate::audio::shared_buffer::OverrunPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for the SDK core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Shared audio buffer settings.
    pub audio: AudioConfig,
    /// Focus manager settings.
    pub focus: FocusConfig,
    /// Directive sequencer settings.
    pub directive: DirectiveConfig,
    /// Built-in energy endpoint detector settings.
    pub endpoint: EndpointConfig,
}

/// Shared audio buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Buffer capacity in frames.
    ///
    /// Must cover the worst-case latency of the slowest reader: with the
    /// default 20ms frames, 300 frames hold 6 seconds of audio.
    pub buffer_capacity: usize,
    /// Input sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per frame.
    pub frame_samples: usize,
    /// What a reader sees after falling more than `buffer_capacity` behind.
    pub overrun_policy: OverrunPolicy,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 300,
            sample_rate: 16_000,
            frame_samples: 320,
            overrun_policy: OverrunPolicy::Silent,
        }
    }
}

/// Focus manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    /// Grace delay before the best background channel is promoted after a release.
    pub promote_delay_ms: u64,
    /// Grace delay before the delegate is told the resource may be released.
    pub release_delay_ms: u64,
    /// Command queue capacity of the coordination task.
    pub command_capacity: usize,
    /// Broadcast capacity for focus events.
    pub event_capacity: usize,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            promote_delay_ms: 200,
            release_delay_ms: 1_000,
            command_capacity: 64,
            event_capacity: 64,
        }
    }
}

impl FocusConfig {
    /// Promotion grace delay as a [`Duration`].
    #[must_use]
    pub fn promote_delay(&self) -> Duration {
        Duration::from_millis(self.promote_delay_ms)
    }

    /// Release grace delay as a [`Duration`].
    #[must_use]
    pub fn release_delay(&self) -> Duration {
        Duration::from_millis(self.release_delay_ms)
    }
}

/// Directive sequencer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectiveConfig {
    /// Command queue capacity of the coordination task.
    pub command_capacity: usize,
    /// Broadcast capacity for directive lifecycle events.
    pub event_capacity: usize,
    /// Number of cancelled dialog request ids remembered.
    pub cancel_history: usize,
}

impl Default for DirectiveConfig {
    fn default() -> Self {
        Self {
            command_capacity: 128,
            event_capacity: 128,
            cancel_history: 10,
        }
    }
}

/// Energy-based endpoint detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// RMS energy above which a frame counts as speech.
    ///
    /// Typical values for f32 samples in \[-1, 1\]:
    ///   - 0.005: very sensitive
    ///   - 0.01:  normal sensitivity (default)
    ///   - 0.05:  only loud/close speech
    pub threshold: f32,
    /// Minimum speech duration in ms before a start is reported.
    pub min_speech_ms: u32,
    /// Trailing silence in ms that ends an utterance.
    pub min_silence_ms: u32,
    /// Time in ms without any speech before a timeout is reported.
    pub timeout_ms: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            min_speech_ms: 100,
            min_silence_ms: 800,
            timeout_ms: 7_000,
        }
    }
}

impl SdkConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| crate::error::SdkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::SdkError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values that would make a component unusable.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Config`](crate::error::SdkError::Config) naming the bad field.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.audio.buffer_capacity == 0 {
            return Err(crate::error::SdkError::Config(
                "audio.buffer_capacity must be greater than zero".into(),
            ));
        }
        if self.audio.sample_rate == 0 {
            return Err(crate::error::SdkError::Config(
                "audio.sample_rate must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path: `dirs::config_dir()/voicelink/config.toml`.
    ///
    /// Override the directory with the `VOICELINK_CONFIG_DIR` environment variable.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        let dir = match std::env::var_os("VOICELINK_CONFIG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .map(|d| d.join("voicelink"))
                .unwrap_or_else(|| PathBuf::from("/tmp/voicelink-config")),
        };
        dir.join("config.toml")
    }
}
