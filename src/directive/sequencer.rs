//! Two-phase directive dispatch.
//!
//! Directives are prefetched strictly in arrival order: the next prefetch
//! does not start before the previous one resolves. Prefetched directives
//! then enter the handle stage, where a directive waits in the pending queue
//! while its resource class is occupied:
//!
//! * any directive waits while a blocking directive of an overlapping class
//!   is in flight;
//! * a blocking directive also waits while any directive of an overlapping
//!   class is in flight or already waiting.
//!
//! Classes overlap when they are equal or either one is
//! [`ResourceClass::Any`]. When a directive completes, the pending queue is
//! re-dispatched in FIFO order. Per-directive failures go to [`Telemetry`]
//! and never stop the sequencer.
//!
//! [`ResourceClass::Any`]: crate::directive::ResourceClass::Any

use crate::config::DirectiveConfig;
use crate::directive::{
    Attachment, BlockingPolicy, CancelPolicy, Directive, DirectiveEvent, DirectiveHandler,
    DirectiveOutcome, DirectiveResult, DirectiveTypeInfo, Header,
};
use crate::error::DirectiveError;
use crate::telemetry::{ErrorReport, Telemetry};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Reply = oneshot::Sender<Result<(), DirectiveError>>;

enum SequencerCommand {
    AddHandlers {
        infos: Vec<DirectiveTypeInfo>,
        handler: Arc<dyn DirectiveHandler>,
        reply: Reply,
    },
    RemoveHandler {
        directive_type: String,
        reply: Reply,
    },
    Submit(Directive),
    SubmitAttachment(Attachment),
    CancelDialog(String),
}

/// Cloneable handle to the directive sequencer task.
#[derive(Clone)]
pub struct DirectiveSequencer {
    commands: mpsc::Sender<SequencerCommand>,
    events: broadcast::Sender<DirectiveEvent>,
    shutdown: CancellationToken,
}

impl DirectiveSequencer {
    /// Create a handle and the task that must be run for it to work.
    #[must_use]
    pub fn new(config: &DirectiveConfig, telemetry: Arc<dyn Telemetry>) -> (Self, SequencerTask) {
        let (commands, commands_rx) = mpsc::channel(config.command_capacity.max(1));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let shutdown = CancellationToken::new();

        let task = SequencerTask {
            commands: commands_rx,
            events: events.clone(),
            telemetry,
            handlers: HashMap::new(),
            prefetch_queue: VecDeque::new(),
            prefetching: false,
            pending: VecDeque::new(),
            tasks: JoinSet::new(),
            running: HashMap::new(),
            cancel_policies: VecDeque::new(),
            cancel_history: config.cancel_history.max(1),
            shutdown: shutdown.clone(),
        };

        (
            Self {
                commands,
                events,
                shutdown,
            },
            task,
        )
    }

    /// Create a handle and spawn its task on the current tokio runtime.
    #[must_use]
    pub fn spawn(config: &DirectiveConfig, telemetry: Arc<dyn Telemetry>) -> Self {
        let (sequencer, task) = Self::new(config, telemetry);
        tokio::spawn(task.run());
        sequencer
    }

    /// Register `handler` for one directive type.
    ///
    /// # Errors
    ///
    /// [`DirectiveError::DuplicateRegistration`] if the type already has a handler.
    pub async fn add_handler(
        &self,
        info: DirectiveTypeInfo,
        handler: Arc<dyn DirectiveHandler>,
    ) -> Result<(), DirectiveError> {
        self.add_handlers(vec![info], handler).await
    }

    /// Register `handler` for several directive types at once.
    ///
    /// Either every type is registered or none is.
    ///
    /// # Errors
    ///
    /// [`DirectiveError::DuplicateRegistration`] naming the first type that
    /// is already registered or listed twice.
    pub async fn add_handlers(
        &self,
        infos: Vec<DirectiveTypeInfo>,
        handler: Arc<dyn DirectiveHandler>,
    ) -> Result<(), DirectiveError> {
        let (reply, rx) = oneshot::channel();
        self.send(SequencerCommand::AddHandlers {
            infos,
            handler,
            reply,
        })
        .await?;
        rx.await.map_err(|_| DirectiveError::Closed)?
    }

    /// Unregister the handler of a directive type.
    ///
    /// Directives already prefetched keep the handler they were prefetched with.
    ///
    /// # Errors
    ///
    /// [`DirectiveError::TypeNotFound`] if the type is not registered.
    pub async fn remove_handler(&self, info: &DirectiveTypeInfo) -> Result<(), DirectiveError> {
        let (reply, rx) = oneshot::channel();
        self.send(SequencerCommand::RemoveHandler {
            directive_type: info.directive_type(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| DirectiveError::Closed)?
    }

    /// Queue a directive for prefetch.
    ///
    /// # Errors
    ///
    /// [`DirectiveError::Closed`] after shutdown.
    pub async fn submit(&self, directive: Directive) -> Result<(), DirectiveError> {
        self.send(SequencerCommand::Submit(directive)).await
    }

    /// Pass an attachment to the handler of its directive type.
    ///
    /// # Errors
    ///
    /// [`DirectiveError::Closed`] after shutdown.
    pub async fn submit_attachment(&self, attachment: Attachment) -> Result<(), DirectiveError> {
        self.send(SequencerCommand::SubmitAttachment(attachment))
            .await
    }

    /// Drop every directive of a dialog that has not started handling,
    /// including ones that arrive later.
    ///
    /// # Errors
    ///
    /// [`DirectiveError::Closed`] after shutdown.
    pub async fn cancel_dialog(&self, dialog_request_id: &str) -> Result<(), DirectiveError> {
        self.send(SequencerCommand::CancelDialog(dialog_request_id.to_owned()))
            .await
    }

    /// Subscribe to directive lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DirectiveEvent> {
        self.events.subscribe()
    }

    /// Stop the task, discarding queued directives and aborting running handlers.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn send(&self, command: SequencerCommand) -> Result<(), DirectiveError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DirectiveError::Closed)
    }
}

struct Registered {
    info: DirectiveTypeInfo,
    handler: Arc<dyn DirectiveHandler>,
}

/// A prefetched directive bound to the handler it will run on.
struct Ready {
    directive: Directive,
    policy: BlockingPolicy,
    handler: Arc<dyn DirectiveHandler>,
}

enum Running {
    Prefetch(Ready),
    Handle {
        header: Header,
        policy: BlockingPolicy,
    },
}

/// Output of a spawned step. A successful prefetch yields `Finished`.
type StepResult = Result<DirectiveOutcome, String>;

/// The task that owns all sequencer state.
pub struct SequencerTask {
    commands: mpsc::Receiver<SequencerCommand>,
    events: broadcast::Sender<DirectiveEvent>,
    telemetry: Arc<dyn Telemetry>,
    handlers: HashMap<String, Registered>,
    prefetch_queue: VecDeque<Directive>,
    prefetching: bool,
    /// Prefetched directives held back by an occupied class, in arrival order.
    pending: VecDeque<Ready>,
    tasks: JoinSet<StepResult>,
    running: HashMap<Id, Running>,
    cancel_policies: VecDeque<(String, CancelPolicy)>,
    cancel_history: usize,
    shutdown: CancellationToken,
}

impl SequencerTask {
    /// Process commands and step completions until shutdown or until every
    /// handle is dropped.
    pub async fn run(mut self) {
        info!("directive sequencer started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
                Some(joined) = self.tasks.join_next_with_id() => self.on_step_done(joined),
            }
        }
        self.discard();
    }

    fn apply(&mut self, command: SequencerCommand) {
        match command {
            SequencerCommand::AddHandlers {
                infos,
                handler,
                reply,
            } => {
                let _ = reply.send(self.add_handlers(infos, handler));
            }
            SequencerCommand::RemoveHandler {
                directive_type,
                reply,
            } => {
                let result = match self.handlers.remove(&directive_type) {
                    Some(_) => {
                        debug!(%directive_type, "directive handler removed");
                        Ok(())
                    }
                    None => Err(DirectiveError::TypeNotFound { directive_type }),
                };
                let _ = reply.send(result);
            }
            SequencerCommand::Submit(directive) => self.submit(directive),
            SequencerCommand::SubmitAttachment(attachment) => self.submit_attachment(attachment),
            SequencerCommand::CancelDialog(dialog_request_id) => {
                self.cancel(&dialog_request_id, CancelPolicy::all());
            }
        }
    }

    fn add_handlers(
        &mut self,
        infos: Vec<DirectiveTypeInfo>,
        handler: Arc<dyn DirectiveHandler>,
    ) -> Result<(), DirectiveError> {
        let mut batch = HashSet::new();
        for info in &infos {
            let directive_type = info.directive_type();
            if self.handlers.contains_key(&directive_type) || !batch.insert(directive_type.clone()) {
                warn!(%directive_type, "duplicate directive handler registration");
                return Err(DirectiveError::DuplicateRegistration { directive_type });
            }
        }

        for info in infos {
            let directive_type = info.directive_type();
            debug!(
                %directive_type,
                resource_class = %info.policy.resource_class,
                is_blocking = info.policy.is_blocking,
                "directive handler added"
            );
            self.handlers.insert(
                directive_type,
                Registered {
                    info,
                    handler: Arc::clone(&handler),
                },
            );
        }
        Ok(())
    }

    fn submit(&mut self, directive: Directive) {
        if self.is_canceled(&directive.header) {
            debug!(
                message_id = %directive.header.message_id,
                dialog_request_id = %directive.header.dialog_request_id,
                "directive arrived for a canceled dialog"
            );
            self.complete(&directive.header, DirectiveResult::Canceled);
            return;
        }
        debug!(
            message_id = %directive.header.message_id,
            directive_type = %directive.directive_type(),
            "directive queued"
        );
        self.prefetch_queue.push_back(directive);
        self.start_next_prefetch();
    }

    fn submit_attachment(&mut self, attachment: Attachment) {
        let directive_type = attachment.header.directive_type();
        match self.handlers.get(&directive_type) {
            Some(registered) => registered.handler.handle_attachment(attachment),
            None => self.telemetry.report(ErrorReport {
                header: attachment.header,
                error: DirectiveError::HandlerNotFound { directive_type },
            }),
        }
    }

    fn start_next_prefetch(&mut self) {
        if self.prefetching {
            return;
        }
        while let Some(directive) = self.prefetch_queue.pop_front() {
            let directive_type = directive.directive_type();
            let registered = self
                .handlers
                .get(&directive_type)
                .map(|r| (r.info.policy.clone(), Arc::clone(&r.handler)));
            let Some((policy, handler)) = registered else {
                self.fail(
                    &directive.header,
                    DirectiveError::HandlerNotFound { directive_type },
                );
                continue;
            };

            self.emit(DirectiveEvent::WillPrefetch {
                header: directive.header.clone(),
            });
            let step_handler = Arc::clone(&handler);
            let step_directive = directive.clone();
            let task = self.tasks.spawn(async move {
                step_handler
                    .prefetch(&step_directive)
                    .await
                    .map(|()| DirectiveOutcome::Finished)
                    .map_err(|e| e.to_string())
            });
            self.running.insert(
                task.id(),
                Running::Prefetch(Ready {
                    directive,
                    policy,
                    handler,
                }),
            );
            self.prefetching = true;
            return;
        }
    }

    fn on_step_done(&mut self, joined: Result<(Id, StepResult), JoinError>) {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(e) => (e.id(), Err(format!("handler task failed: {e}"))),
        };
        let Some(running) = self.running.remove(&id) else {
            return;
        };

        match running {
            Running::Prefetch(ready) => {
                self.prefetching = false;
                match result {
                    Ok(_) if self.is_canceled(&ready.directive.header) => {
                        ready.handler.cancel(&ready.directive);
                        self.complete(&ready.directive.header, DirectiveResult::Canceled);
                    }
                    Ok(_) => self.dispatch(ready),
                    Err(reason) => {
                        let header = ready.directive.header.clone();
                        let directive_type = header.directive_type();
                        self.fail(
                            &header,
                            DirectiveError::PrefetchFailed {
                                directive_type,
                                reason,
                            },
                        );
                    }
                }
                self.start_next_prefetch();
            }
            Running::Handle { header, .. } => {
                match result {
                    Ok(DirectiveOutcome::Finished) => {
                        self.complete(&header, DirectiveResult::Finished);
                    }
                    Ok(DirectiveOutcome::Stopped(cancel_policy)) => {
                        self.complete(&header, DirectiveResult::Stopped);
                        self.cancel(&header.dialog_request_id, cancel_policy);
                    }
                    Err(reason) => {
                        let directive_type = header.directive_type();
                        self.fail(
                            &header,
                            DirectiveError::HandleFailed {
                                directive_type,
                                reason,
                            },
                        );
                    }
                }
                self.drain();
            }
        }
    }

    fn dispatch(&mut self, ready: Ready) {
        if self.must_wait(&ready.policy) {
            debug!(
                message_id = %ready.directive.header.message_id,
                resource_class = %ready.policy.resource_class,
                "directive blocked by its resource class"
            );
            self.emit(DirectiveEvent::Blocked {
                header: ready.directive.header.clone(),
                resource_class: ready.policy.resource_class.clone(),
            });
            self.pending.push_back(ready);
            return;
        }
        self.start_handle(ready);
    }

    fn must_wait(&self, policy: &BlockingPolicy) -> bool {
        let class = &policy.resource_class;
        let mut class_busy = false;
        for running in self.running.values() {
            if let Running::Handle { policy: other, .. } = running {
                if other.resource_class.overlaps(class) {
                    if other.is_blocking {
                        return true;
                    }
                    class_busy = true;
                }
            }
        }
        let class_waiting = self
            .pending
            .iter()
            .any(|ready| ready.policy.resource_class.overlaps(class));
        policy.is_blocking && (class_busy || class_waiting)
    }

    fn start_handle(&mut self, ready: Ready) {
        let Ready {
            directive,
            policy,
            handler,
        } = ready;
        let header = directive.header.clone();
        debug!(
            message_id = %header.message_id,
            directive_type = %header.directive_type(),
            "handling directive"
        );
        self.emit(DirectiveEvent::WillHandle {
            header: header.clone(),
        });
        let task = self
            .tasks
            .spawn(async move { handler.handle(directive).await.map_err(|e| e.to_string()) });
        self.running
            .insert(task.id(), Running::Handle { header, policy });
    }

    fn drain(&mut self) {
        for ready in std::mem::take(&mut self.pending) {
            if self.must_wait(&ready.policy) {
                self.pending.push_back(ready);
            } else {
                self.start_handle(ready);
            }
        }
    }

    /// Record `policy` for the dialog and drop the matching directives that
    /// have not started handling.
    fn cancel(&mut self, dialog_request_id: &str, policy: CancelPolicy) {
        let targeted = |header: &Header| {
            header.dialog_request_id == dialog_request_id
                && policy.matches(&header.directive_type())
        };

        let mut canceled = Vec::new();
        let (dropped, kept): (VecDeque<_>, VecDeque<_>) = self
            .prefetch_queue
            .drain(..)
            .partition(|d| targeted(&d.header));
        self.prefetch_queue = kept;
        canceled.extend(dropped.into_iter().map(|d| d.header));

        let (dropped, kept): (VecDeque<_>, VecDeque<_>) = self
            .pending
            .drain(..)
            .partition(|ready| targeted(&ready.directive.header));
        self.pending = kept;
        for ready in dropped {
            ready.handler.cancel(&ready.directive);
            canceled.push(ready.directive.header);
        }

        info!(
            %dialog_request_id,
            cancel_all = policy.cancel_all,
            targets = ?policy.targets,
            canceled = canceled.len(),
            "dialog canceled"
        );

        let entry = (dialog_request_id.to_owned(), policy);
        if !self.cancel_policies.contains(&entry) {
            self.cancel_policies.push_back(entry);
            while self.cancel_policies.len() > self.cancel_history {
                self.cancel_policies.pop_front();
            }
        }

        for header in canceled {
            self.complete(&header, DirectiveResult::Canceled);
        }
        // Dropping a waiting directive can unblock the ones behind it.
        self.drain();
    }

    fn is_canceled(&self, header: &Header) -> bool {
        let directive_type = header.directive_type();
        self.cancel_policies.iter().any(|(dialog_request_id, policy)| {
            *dialog_request_id == header.dialog_request_id && policy.matches(&directive_type)
        })
    }

    fn fail(&mut self, header: &Header, error: DirectiveError) {
        let reason = error.to_string();
        self.telemetry.report(ErrorReport {
            header: header.clone(),
            error,
        });
        self.complete(header, DirectiveResult::Failed(reason));
    }

    fn complete(&self, header: &Header, result: DirectiveResult) {
        debug!(message_id = %header.message_id, ?result, "directive completed");
        self.emit(DirectiveEvent::Completed {
            header: header.clone(),
            result,
        });
    }

    fn emit(&self, event: DirectiveEvent) {
        let _ = self.events.send(event);
    }

    fn discard(&mut self) {
        self.tasks.abort_all();
        let discarded = self.prefetch_queue.len()
            + self.pending.len()
            + self.running.len();
        self.prefetch_queue.clear();
        self.pending.clear();
        self.running.clear();
        info!(discarded, "directive sequencer stopped");
    }
}
