//! Focus manager arbitration with the stock priorities.

use crate::helpers::Journal;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use voicelink::config::FocusConfig;
use voicelink::focus::{
    ChannelPriority, FocusChannel, FocusDelegate, FocusEvent, FocusManager, FocusState,
    NoopFocusDelegate,
};

fn journaled(journal: &Journal) -> impl Fn(&str, FocusState) + Send + Sync + 'static {
    let journal = journal.clone();
    move |channel: &str, state: FocusState| journal.push(format!("{channel}:{state}"))
}

#[tokio::test(start_paused = true)]
async fn higher_priority_preempts_and_lower_resumes_after_grace_delay() {
    let journal = Journal::default();
    let manager = FocusManager::spawn(&FocusConfig::default(), Arc::new(NoopFocusDelegate));
    manager
        .register(FocusChannel::new("a", ChannelPriority::new(1)), journaled(&journal))
        .await;
    manager
        .register(FocusChannel::new("b", ChannelPriority::new(3)), journaled(&journal))
        .await;

    manager.request_focus("a").await;
    manager.request_focus("b").await;
    assert_eq!(manager.state("a").await, Some(FocusState::Background));
    assert_eq!(manager.state("b").await, Some(FocusState::Foreground));

    manager.release_focus("b").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.state("a").await, Some(FocusState::Background));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(manager.state("a").await, Some(FocusState::Foreground));

    assert_eq!(
        journal.entries(),
        vec![
            "a:foreground",
            "a:background",
            "b:foreground",
            "b:idle",
            "a:foreground"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn recognition_preempts_media_which_resumes_first() {
    let manager = FocusManager::spawn(&FocusConfig::default(), Arc::new(NoopFocusDelegate));
    for (name, priority) in [
        ("media", ChannelPriority::MEDIA),
        ("recognition", ChannelPriority::USER_RECOGNITION),
        ("ambient", ChannelPriority::BACKGROUND),
    ] {
        manager
            .register(FocusChannel::new(name, priority), |_: &str, _: FocusState| {})
            .await;
    }

    manager.request_focus("media").await;
    manager.request_focus("ambient").await;
    assert_eq!(manager.state("media").await, Some(FocusState::Foreground));
    assert_eq!(manager.state("ambient").await, Some(FocusState::Background));

    manager.request_focus("recognition").await;
    assert_eq!(manager.state("recognition").await, Some(FocusState::Foreground));
    assert_eq!(manager.state("media").await, Some(FocusState::Background));

    // media and ambient maintain at the same rank; the earlier registration wins
    manager.release_focus("recognition").await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(manager.state("media").await, Some(FocusState::Foreground));
    assert_eq!(manager.state("ambient").await, Some(FocusState::Background));
}

#[derive(Default)]
struct SessionDelegate {
    released: AtomicUsize,
    changes: AtomicUsize,
}

impl FocusDelegate for SessionDelegate {
    fn focus_should_release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn channel_state_changed(&self, _channel: &str, _state: FocusState) {
        self.changes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn audio_session_is_released_once_everything_is_idle() {
    let delegate = Arc::new(SessionDelegate::default());
    let manager = FocusManager::spawn(&FocusConfig::default(), delegate.clone());
    let mut events = manager.subscribe();
    manager
        .register(FocusChannel::new("tts", ChannelPriority::INFORMATION), |_: &str, _: FocusState| {})
        .await;

    manager.request_focus("tts").await;
    manager.release_focus("tts").await;
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    manager.snapshot().await;

    assert_eq!(delegate.released.load(Ordering::SeqCst), 1);
    assert_eq!(delegate.changes.load(Ordering::SeqCst), 2);
    assert_eq!(
        events.recv().await.unwrap(),
        FocusEvent::StateChanged {
            channel: "tts".into(),
            state: FocusState::Foreground
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        FocusEvent::StateChanged {
            channel: "tts".into(),
            state: FocusState::Idle
        }
    );
    assert_eq!(events.recv().await.unwrap(), FocusEvent::ResourceMayBeReleased);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_manager() {
    let manager = FocusManager::spawn(&FocusConfig::default(), Arc::new(NoopFocusDelegate));
    manager
        .register(FocusChannel::new("a", ChannelPriority::SOUND), |_: &str, _: FocusState| {})
        .await;
    manager.shutdown();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(manager.snapshot().await.is_empty());
    assert_eq!(manager.state("a").await, None);
}
