//! Priority-based arbitration of the physical audio channel.
//!
//! Consumers that need exclusive use of audio I/O register a named
//! [`FocusChannel`] with the [`FocusManager`] and request focus. At most one
//! channel is [`FocusState::Foreground`] at any instant; others that asked
//! for focus wait in [`FocusState::Background`] and must not use the
//! physical resource until promoted.

pub mod manager;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use manager::{FocusCoordinator, FocusManager};

/// Grant state of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusState {
    /// Not interested in the resource.
    #[default]
    Idle,
    /// Interested but paused behind the foreground holder.
    Background,
    /// Exclusive owner of the resource.
    Foreground,
}

impl fmt::Display for FocusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Background => "background",
            Self::Foreground => "foreground",
        })
    }
}

/// Priority of a channel.
///
/// `request` is compared against the foreground holder's `maintain`
/// priority when the channel asks for focus; `maintain` ranks background
/// channels for promotion and defends the channel while it holds focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPriority {
    pub request: i32,
    pub maintain: i32,
}

impl ChannelPriority {
    pub const CALL: Self = Self::split(300, 300);
    pub const USER_RECOGNITION: Self = Self::split(300, 250);
    pub const DM_RECOGNITION: Self = Self::split(150, 200);
    pub const ALERTS: Self = Self::split(250, 200);
    pub const INFORMATION: Self = Self::split(250, 200);
    pub const MEDIA: Self = Self::split(200, 100);
    pub const BEEP: Self = Self::split(100, 150);
    pub const SOUND: Self = Self::split(100, 100);
    pub const BACKGROUND: Self = Self::split(0, 100);

    /// A single rank used for both requesting and maintaining focus.
    #[must_use]
    pub const fn new(priority: i32) -> Self {
        Self::split(priority, priority)
    }

    /// Distinct request and maintain ranks.
    #[must_use]
    pub const fn split(request: i32, maintain: i32) -> Self {
        Self { request, maintain }
    }
}

/// A named participant competing for the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusChannel {
    pub name: String,
    pub priority: ChannelPriority,
}

impl FocusChannel {
    pub fn new(name: impl Into<String>, priority: ChannelPriority) -> Self {
        Self {
            name: name.into(),
            priority,
        }
    }
}

/// Per-channel state-change callback.
///
/// Invoked synchronously on the focus manager's coordination task; must not
/// block.
pub trait FocusChannelObserver: Send + Sync + 'static {
    fn focus_changed(&self, channel: &str, state: FocusState);
}

impl<F> FocusChannelObserver for F
where
    F: Fn(&str, FocusState) + Send + Sync + 'static,
{
    fn focus_changed(&self, channel: &str, state: FocusState) {
        self(channel, state);
    }
}

/// Owner-side hooks of the focus manager (typically the audio session).
pub trait FocusDelegate: Send + Sync + 'static {
    /// Gate checked on every request; a closed gate turns requests into no-ops.
    fn focus_should_acquire(&self) -> bool {
        true
    }

    /// Every channel has stayed idle through the release grace delay.
    fn focus_should_release(&self);

    /// Any channel changed state.
    fn channel_state_changed(&self, _channel: &str, _state: FocusState) {}
}

/// Delegate that always grants acquisition and ignores notifications.
#[derive(Debug, Default)]
pub struct NoopFocusDelegate;

impl FocusDelegate for NoopFocusDelegate {
    fn focus_should_release(&self) {}
}

/// Focus notifications broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusEvent {
    StateChanged { channel: String, state: FocusState },
    ResourceMayBeReleased,
}
