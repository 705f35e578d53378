//! Wiring of the SDK core from one [`SdkConfig`].
//!
//! A platform layer creates one [`VoiceClient`], hands it an audio source,
//! registers its focus channels and capability handlers, and feeds the
//! sequencer with directives from its transport.

use crate::audio::source::{AudioSource, pump};
use crate::audio::{AudioFrame, SharedBuffer};
use crate::config::SdkConfig;
use crate::detector::{DetectorRunner, EnergyEndpointEngine};
use crate::directive::DirectiveSequencer;
use crate::error::Result;
use crate::focus::{FocusDelegate, FocusManager};
use crate::telemetry::Telemetry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Running SDK core: the shared audio buffer, focus manager and directive sequencer.
pub struct VoiceClient {
    config: SdkConfig,
    audio: SharedBuffer<AudioFrame>,
    focus: FocusManager,
    directives: DirectiveSequencer,
    cancel: CancellationToken,
}

impl VoiceClient {
    /// Validate `config` and start every component on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a config error if `config` does not validate.
    pub fn start(
        config: SdkConfig,
        focus_delegate: Arc<dyn FocusDelegate>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Result<Self> {
        config.validate()?;
        let audio = SharedBuffer::with_overrun_policy(
            config.audio.buffer_capacity,
            config.audio.overrun_policy,
        )?;
        let focus = FocusManager::spawn(&config.focus, focus_delegate);
        let directives = DirectiveSequencer::spawn(&config.directive, telemetry);

        info!(
            buffer_capacity = config.audio.buffer_capacity,
            sample_rate = config.audio.sample_rate,
            "voice client started"
        );
        Ok(Self {
            config,
            audio,
            focus,
            directives,
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// The shared microphone buffer.
    #[must_use]
    pub fn audio(&self) -> &SharedBuffer<AudioFrame> {
        &self.audio
    }

    #[must_use]
    pub fn focus(&self) -> &FocusManager {
        &self.focus
    }

    #[must_use]
    pub fn directives(&self) -> &DirectiveSequencer {
        &self.directives
    }

    /// Start pumping `source` into the shared buffer as its new writer.
    ///
    /// A previously started source is superseded and stops on its next frame.
    pub fn start_audio<S: AudioSource + 'static>(&self, source: S) -> JoinHandle<Result<u64>> {
        let writer = self.audio.make_writer();
        tokio::spawn(pump(source, writer, self.cancel.child_token()))
    }

    /// An end-point detector reading the shared buffer from now on.
    #[must_use]
    pub fn endpoint_detector(&self) -> DetectorRunner<EnergyEndpointEngine> {
        DetectorRunner::new(
            EnergyEndpointEngine::new(&self.config.endpoint),
            self.audio.make_reader(),
        )
    }

    /// Token cancelled on [`shutdown`](Self::shutdown), for tasks tied to the client.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Stop audio pumps, the focus manager and the directive sequencer.
    pub fn shutdown(&self) {
        info!("voice client shutting down");
        self.cancel.cancel();
        self.focus.shutdown();
        self.directives.shutdown();
    }
}
