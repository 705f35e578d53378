//! End-to-end flow: a directive opens a recognition session that takes the
//! audio focus and listens on the shared buffer until the user stops talking.

use crate::helpers::{completion, directive};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use voicelink::audio::source::channel_source;
use voicelink::audio::{AudioFrame, SharedBuffer};
use voicelink::config::EndpointConfig;
use voicelink::detector::{Detection, DetectorEvent, DetectorRunner, EnergyEndpointEngine};
use voicelink::directive::{
    BlockingPolicy, Directive, DirectiveHandler, DirectiveOutcome, DirectiveResult,
    DirectiveTypeInfo, ResourceClass,
};
use voicelink::error::HandlerError;
use voicelink::focus::{
    ChannelPriority, FocusChannel, FocusEvent, FocusManager, FocusState, NoopFocusDelegate,
};
use voicelink::telemetry::TracingTelemetry;
use voicelink::{SdkConfig, VoiceClient};

struct RecognitionCapability {
    focus: FocusManager,
    audio: SharedBuffer<AudioFrame>,
    endpoint: EndpointConfig,
}

#[async_trait]
impl DirectiveHandler for RecognitionCapability {
    async fn handle(&self, _directive: Directive) -> Result<DirectiveOutcome, HandlerError> {
        let runner = DetectorRunner::new(
            EnergyEndpointEngine::new(&self.endpoint),
            self.audio.make_reader(),
        );
        let mut detections = runner.subscribe();
        self.focus.request_focus("recognition").await;

        let session = tokio::spawn(runner.run(CancellationToken::new()));
        let mut heard_end = false;
        while let Ok(event) = detections.recv().await {
            match event {
                DetectorEvent::Detected(Detection::SpeechEnd) => heard_end = true,
                DetectorEvent::Stopped(_) => break,
                DetectorEvent::Detected(_) => {}
            }
        }
        let _ = session.await;
        self.focus.release_focus("recognition").await;

        if heard_end {
            Ok(DirectiveOutcome::Finished)
        } else {
            Err(HandlerError::new("no speech end"))
        }
    }
}

#[tokio::test]
async fn expect_speech_listens_until_end_point() {
    let mut config = SdkConfig::default();
    config.endpoint = EndpointConfig {
        threshold: 0.05,
        min_speech_ms: 40,
        min_silence_ms: 100,
        timeout_ms: 5_000,
    };
    let client = VoiceClient::start(
        config.clone(),
        Arc::new(NoopFocusDelegate),
        Arc::new(TracingTelemetry),
    )
    .unwrap();

    let mut focus_events = client.focus().subscribe();
    client
        .focus()
        .register(
            FocusChannel::new("recognition", ChannelPriority::USER_RECOGNITION),
            |_: &str, _: FocusState| {},
        )
        .await;
    client
        .directives()
        .add_handler(
            DirectiveTypeInfo::new("ASR", "ExpectSpeech", BlockingPolicy::blocking(ResourceClass::Audio)),
            Arc::new(RecognitionCapability {
                focus: client.focus().clone(),
                audio: client.audio().clone(),
                endpoint: config.endpoint.clone(),
            }),
        )
        .await
        .unwrap();

    let (mic, source) = channel_source(64);
    let _pump = client.start_audio(source);
    let mut directive_events = client.directives().subscribe();
    client
        .directives()
        .submit(directive("ASR", "ExpectSpeech", "d1", "expect", serde_json::json!({})))
        .await
        .unwrap();

    let granted = tokio::time::timeout(Duration::from_secs(5), focus_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        granted,
        FocusEvent::StateChanged {
            channel: "recognition".into(),
            state: FocusState::Foreground
        }
    );

    for _ in 0..5 {
        mic.send(AudioFrame::new(vec![0.3; 320], 16_000)).await.unwrap();
    }
    for _ in 0..10 {
        mic.send(AudioFrame::new(vec![0.0; 320], 16_000)).await.unwrap();
    }

    assert_eq!(
        completion(&mut directive_events, "expect").await,
        DirectiveResult::Finished
    );
    assert_eq!(
        client.focus().state("recognition").await,
        Some(FocusState::Idle)
    );
    client.shutdown();
}
