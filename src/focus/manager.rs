//! Focus manager handle and its coordination task.
//!
//! Every operation is a message into one [`FocusCoordinator`] task, which
//! owns the channel registry exclusively. Channel transitions are therefore
//! strictly serialized, and callbacks run on that task in transition order.
//!
//! Two independent deferred tasks debounce the effects of a release:
//!
//! * **promote**: after `promote_delay`, if nothing is foreground, the
//!   background channel with the highest maintain priority is promoted;
//! * **release**: after `release_delay`, if every channel is idle, the
//!   delegate is told the physical resource may be released.
//!
//! Any new request, release or forced stop cancels both before it is applied;
//! they are re-armed afterwards if the resulting state still calls for them.

use crate::config::FocusConfig;
use crate::focus::{
    ChannelPriority, FocusChannel, FocusChannelObserver, FocusDelegate, FocusEvent, FocusState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum FocusCommand {
    Register {
        channel: FocusChannel,
        observer: Arc<dyn FocusChannelObserver>,
    },
    Unregister {
        name: String,
    },
    Request {
        name: String,
    },
    Release {
        name: String,
    },
    StopForeground,
    Snapshot {
        reply: oneshot::Sender<Vec<(String, FocusState)>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Promote,
    Release,
}

#[derive(Debug, Clone, Copy)]
struct TimerFired {
    kind: TimerKind,
    generation: u64,
}

/// A deferred task that can be cancelled before it fires.
struct Deferred {
    cancel: CancellationToken,
    generation: u64,
}

/// Cloneable handle used to talk to the focus coordination task.
#[derive(Clone)]
pub struct FocusManager {
    commands: mpsc::Sender<FocusCommand>,
    events: broadcast::Sender<FocusEvent>,
    shutdown: CancellationToken,
}

impl FocusManager {
    /// Create a handle and the coordinator that must be run for it to work.
    #[must_use]
    pub fn new(config: &FocusConfig, delegate: Arc<dyn FocusDelegate>) -> (Self, FocusCoordinator) {
        let (commands, commands_rx) = mpsc::channel(config.command_capacity.max(1));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let coordinator = FocusCoordinator {
            promote_delay: config.promote_delay(),
            release_delay: config.release_delay(),
            delegate,
            channels: Vec::new(),
            commands: commands_rx,
            timer_tx,
            timers: timer_rx,
            events: events.clone(),
            promote: None,
            release: None,
            next_generation: 0,
            shutdown: shutdown.clone(),
        };

        (
            Self {
                commands,
                events,
                shutdown,
            },
            coordinator,
        )
    }

    /// Create a handle and spawn its coordinator on the current tokio runtime.
    #[must_use]
    pub fn spawn(config: &FocusConfig, delegate: Arc<dyn FocusDelegate>) -> Self {
        let (manager, coordinator) = Self::new(config, delegate);
        tokio::spawn(coordinator.run());
        manager
    }

    /// Register a channel at [`FocusState::Idle`], replacing any channel of the same name.
    pub async fn register(&self, channel: FocusChannel, observer: impl FocusChannelObserver) {
        self.send(FocusCommand::Register {
            channel,
            observer: Arc::new(observer),
        })
        .await;
    }

    /// Remove a channel.
    pub async fn unregister(&self, name: &str) {
        self.send(FocusCommand::Unregister {
            name: name.to_owned(),
        })
        .await;
    }

    /// Ask for the resource on behalf of `name`.
    pub async fn request_focus(&self, name: &str) {
        self.send(FocusCommand::Request {
            name: name.to_owned(),
        })
        .await;
    }

    /// Give up the resource (or the place in line) held by `name`.
    pub async fn release_focus(&self, name: &str) {
        self.send(FocusCommand::Release {
            name: name.to_owned(),
        })
        .await;
    }

    /// Force the current foreground holder back to idle.
    pub async fn stop_foreground_activity(&self) {
        self.send(FocusCommand::StopForeground).await;
    }

    /// Current state of every registered channel, in registration order.
    ///
    /// Reflects every operation sent from this handle before the call.
    pub async fn snapshot(&self) -> Vec<(String, FocusState)> {
        let (reply, rx) = oneshot::channel();
        self.send(FocusCommand::Snapshot { reply }).await;
        rx.await.unwrap_or_default()
    }

    /// State of one channel, if registered.
    pub async fn state(&self, name: &str) -> Option<FocusState> {
        self.snapshot()
            .await
            .into_iter()
            .find(|(channel, _)| channel == name)
            .map(|(_, state)| state)
    }

    /// Subscribe to focus notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FocusEvent> {
        self.events.subscribe()
    }

    /// Stop the coordination task and cancel pending deferred work.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn send(&self, command: FocusCommand) {
        if self.commands.send(command).await.is_err() {
            warn!("focus manager is shut down, dropping command");
        }
    }
}

struct ChannelEntry {
    channel: FocusChannel,
    state: FocusState,
    observer: Arc<dyn FocusChannelObserver>,
}

/// The coordination task that owns all focus state.
pub struct FocusCoordinator {
    promote_delay: Duration,
    release_delay: Duration,
    delegate: Arc<dyn FocusDelegate>,
    channels: Vec<ChannelEntry>,
    commands: mpsc::Receiver<FocusCommand>,
    timer_tx: mpsc::UnboundedSender<TimerFired>,
    timers: mpsc::UnboundedReceiver<TimerFired>,
    events: broadcast::Sender<FocusEvent>,
    promote: Option<Deferred>,
    release: Option<Deferred>,
    next_generation: u64,
    shutdown: CancellationToken,
}

impl FocusCoordinator {
    /// Process commands until every handle is dropped or shutdown is requested.
    pub async fn run(mut self) {
        info!("focus manager started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
                Some(fired) = self.timers.recv() => self.on_timer(fired),
            }
        }
        self.cancel_timer(TimerKind::Promote);
        self.cancel_timer(TimerKind::Release);
        info!("focus manager stopped");
    }

    fn apply(&mut self, command: FocusCommand) {
        match command {
            FocusCommand::Register { channel, observer } => self.register(channel, observer),
            FocusCommand::Unregister { name } => {
                let before = self.channels.len();
                self.channels.retain(|entry| entry.channel.name != name);
                if self.channels.len() == before {
                    warn!(channel = %name, "unregister of unknown focus channel");
                    return;
                }
                debug!(channel = %name, "focus channel unregistered");
                self.rearm_timers();
            }
            FocusCommand::Request { name } => self.request(&name),
            FocusCommand::Release { name } => self.release(&name),
            FocusCommand::StopForeground => self.stop_foreground(),
            FocusCommand::Snapshot { reply } => {
                let snapshot = self
                    .channels
                    .iter()
                    .map(|entry| (entry.channel.name.clone(), entry.state))
                    .collect();
                let _ = reply.send(snapshot);
            }
        }
    }

    fn register(&mut self, channel: FocusChannel, observer: Arc<dyn FocusChannelObserver>) {
        debug!(
            channel = %channel.name,
            request = channel.priority.request,
            maintain = channel.priority.maintain,
            "focus channel registered"
        );
        let Some(previous) = self.entry(&channel.name).map(|entry| entry.state) else {
            self.channels.push(ChannelEntry {
                channel,
                state: FocusState::Idle,
                observer,
            });
            return;
        };

        // Re-registration drops whatever the old registration held.
        self.set_state(&channel.name, FocusState::Idle);
        if let Some(entry) = self
            .channels
            .iter_mut()
            .find(|entry| entry.channel.name == channel.name)
        {
            entry.channel = channel;
            entry.observer = observer;
        }
        if previous != FocusState::Idle {
            self.cancel_timer(TimerKind::Promote);
            self.cancel_timer(TimerKind::Release);
            self.rearm_timers();
        }
    }

    fn request(&mut self, name: &str) {
        let Some(requested) = self.entry(name).map(|entry| entry.channel.priority) else {
            warn!(channel = %name, "focus request from unregistered channel");
            return;
        };
        self.cancel_timer(TimerKind::Promote);
        self.cancel_timer(TimerKind::Release);

        if !self.delegate.focus_should_acquire() {
            warn!(channel = %name, "focus should not be acquired now");
            self.set_state(name, FocusState::Idle);
            self.rearm_timers();
            return;
        }

        match self.foreground() {
            Some((holder, _)) if holder == name => {}
            Some((holder, holder_priority)) => {
                if requested.request >= holder_priority.maintain {
                    self.set_state(&holder, FocusState::Background);
                    self.set_state(name, FocusState::Foreground);
                } else {
                    self.set_state(name, FocusState::Background);
                }
            }
            None => {
                let outranked = self.best_background(Some(name)).is_some_and(|(_, waiting)| {
                    requested.request < waiting.maintain
                });
                if outranked {
                    self.set_state(name, FocusState::Background);
                } else {
                    self.set_state(name, FocusState::Foreground);
                }
            }
        }
        self.rearm_timers();
    }

    fn release(&mut self, name: &str) {
        if self.entry(name).is_none() {
            warn!(channel = %name, "focus release from unregistered channel");
            return;
        }
        self.cancel_timer(TimerKind::Promote);
        self.cancel_timer(TimerKind::Release);
        self.set_state(name, FocusState::Idle);
        self.rearm_timers();
    }

    fn stop_foreground(&mut self) {
        self.cancel_timer(TimerKind::Promote);
        self.cancel_timer(TimerKind::Release);
        match self.foreground() {
            Some((holder, _)) => self.set_state(&holder, FocusState::Idle),
            None => debug!("no foreground channel to stop"),
        }
        self.rearm_timers();
    }

    fn on_timer(&mut self, fired: TimerFired) {
        let slot = match fired.kind {
            TimerKind::Promote => &mut self.promote,
            TimerKind::Release => &mut self.release,
        };
        if slot.as_ref().map(|deferred| deferred.generation) != Some(fired.generation) {
            return;
        }
        *slot = None;

        match fired.kind {
            TimerKind::Promote => {
                if self.foreground().is_some() {
                    return;
                }
                if let Some((name, _)) = self.best_background(None) {
                    debug!(channel = %name, "promoting background channel");
                    self.set_state(&name, FocusState::Foreground);
                }
            }
            TimerKind::Release => {
                if self.all_idle() {
                    debug!("all focus channels idle, resource may be released");
                    self.delegate.focus_should_release();
                    let _ = self.events.send(FocusEvent::ResourceMayBeReleased);
                }
            }
        }
    }

    fn set_state(&mut self, name: &str, state: FocusState) {
        let Some(entry) = self
            .channels
            .iter_mut()
            .find(|entry| entry.channel.name == name)
        else {
            warn!(channel = %name, %state, "cannot set state of unregistered channel");
            return;
        };
        if entry.state == state {
            return;
        }
        debug!(channel = %name, from = %entry.state, to = %state, "focus state changed");
        entry.state = state;
        let observer = Arc::clone(&entry.observer);

        observer.focus_changed(name, state);
        self.delegate.channel_state_changed(name, state);
        let _ = self.events.send(FocusEvent::StateChanged {
            channel: name.to_owned(),
            state,
        });
    }

    /// Arm whichever deferred tasks the current state calls for.
    fn rearm_timers(&mut self) {
        if self.foreground().is_none()
            && self.best_background(None).is_some()
            && self.promote.is_none()
        {
            self.schedule(TimerKind::Promote);
        }
        if self.all_idle() && self.release.is_none() {
            self.schedule(TimerKind::Release);
        }
    }

    fn schedule(&mut self, kind: TimerKind) {
        self.cancel_timer(kind);
        self.next_generation += 1;
        let generation = self.next_generation;
        let delay = match kind {
            TimerKind::Promote => self.promote_delay,
            TimerKind::Release => self.release_delay,
        };
        let cancel = self.shutdown.child_token();
        let fired_tx = self.timer_tx.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = fired_tx.send(TimerFired { kind, generation });
                }
            }
        });

        let deferred = Some(Deferred { cancel, generation });
        match kind {
            TimerKind::Promote => self.promote = deferred,
            TimerKind::Release => self.release = deferred,
        }
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        let slot = match kind {
            TimerKind::Promote => self.promote.take(),
            TimerKind::Release => self.release.take(),
        };
        if let Some(deferred) = slot {
            deferred.cancel.cancel();
        }
    }

    fn entry(&self, name: &str) -> Option<&ChannelEntry> {
        self.channels.iter().find(|entry| entry.channel.name == name)
    }

    fn foreground(&self) -> Option<(String, ChannelPriority)> {
        self.channels
            .iter()
            .find(|entry| entry.state == FocusState::Foreground)
            .map(|entry| (entry.channel.name.clone(), entry.channel.priority))
    }

    /// Background channel with the highest maintain priority, earliest registered first.
    fn best_background(
        &self,
        excluding: Option<&str>,
    ) -> Option<(String, ChannelPriority)> {
        let mut best: Option<&ChannelEntry> = None;
        for entry in &self.channels {
            if entry.state != FocusState::Background
                || excluding.is_some_and(|name| name == entry.channel.name)
            {
                continue;
            }
            if best.is_none_or(|b| entry.channel.priority.maintain > b.channel.priority.maintain) {
                best = Some(entry);
            }
        }
        best.map(|entry| (entry.channel.name.clone(), entry.channel.priority))
    }

    fn all_idle(&self) -> bool {
        self.channels
            .iter()
            .all(|entry| entry.state == FocusState::Idle)
    }
}
