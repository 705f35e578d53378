//! Single-writer, multi-reader ring buffer for fanning out audio frames.
//!
//! One [`Writer`] publishes a sequential stream; any number of [`Reader`]s
//! consume it independently, each with its own cursor. The wake word
//! detector, endpoint detector and uploader all read the same frames without
//! copying the stream per consumer and without ever blocking the producer.
//!
//! # Architecture
//!
//! ```text
//! Writer::write ──┐                        ┌──> Reader (keyword)
//! make_writer  ───┼─> commands ─> [buffer ─┼──> Reader (endpoint)
//! make_reader  ───┘               thread]  └──> Reader (uploader)
//! ```
//!
//! All buffer state (slots, write position, suspended reads) is owned by one
//! coordination thread. Handles only send messages into it over an unbounded
//! `crossbeam-channel`, so a write from a real-time audio callback never
//! waits on a lock or an async runtime. Suspended reads are registered
//! continuations (`oneshot` senders) completed by the next write or by
//! [`Writer::finish`].
//!
//! # Overrun
//!
//! Capacity is fixed and the writer is never held back. A reader that falls
//! more than `capacity` elements behind reads slots that have already been
//! overwritten. With [`OverrunPolicy::Silent`] this goes unreported and the
//! reader simply receives newer data; [`OverrunPolicy::Report`] turns it into
//! [`BufferError::Overrun`] and moves the reader to the oldest retained
//! element. Size the capacity for the worst-case reader latency.

use crate::error::{BufferError, Result, SdkError};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_stream::Stream;
use tracing::{debug, trace, warn};

/// Writer id that never belongs to a live writer.
const NO_WRITER: u64 = 0;

/// Behaviour when a reader lags more than `capacity` elements behind the writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrunPolicy {
    /// Read whatever the slot now holds; the lag goes unreported.
    #[default]
    Silent,
    /// Fail the read with [`BufferError::Overrun`] and resync the reader.
    Report,
}

enum Command<T> {
    SetWriter {
        writer_id: u64,
    },
    Write {
        writer_id: u64,
        element: T,
    },
    Finish {
        writer_id: u64,
    },
    Attach {
        reply: oneshot::Sender<u64>,
    },
    Read {
        position: u64,
        reply: oneshot::Sender<ReadOutcome<T>>,
    },
}

struct ReadOutcome<T> {
    result: std::result::Result<T, BufferError>,
    next_position: u64,
}

struct PendingRead<T> {
    position: u64,
    reply: oneshot::Sender<ReadOutcome<T>>,
}

/// State shared by the handles; the coordination thread owns everything else.
struct Shared {
    capacity: usize,
    current_writer: AtomicU64,
    /// Last writer id handed out. Held while a writer is installed so the
    /// atomic and the coordination thread see writers in the same order.
    last_writer_id: Mutex<u64>,
}

/// Fixed-capacity shared buffer with one writer and many readers.
pub struct SharedBuffer<T> {
    shared: Arc<Shared>,
    commands: Sender<Command<T>>,
}

impl<T> Clone for SharedBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            commands: self.commands.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> SharedBuffer<T> {
    /// Create a buffer holding `capacity` elements with the silent overrun policy.
    ///
    /// # Errors
    ///
    /// Returns an error if `capacity` is zero or the coordination thread
    /// cannot be spawned.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_overrun_policy(capacity, OverrunPolicy::Silent)
    }

    /// Create a buffer with an explicit overrun policy.
    ///
    /// # Errors
    ///
    /// Returns an error if `capacity` is zero or the coordination thread
    /// cannot be spawned.
    pub fn with_overrun_policy(capacity: usize, policy: OverrunPolicy) -> Result<Self> {
        if capacity == 0 {
            return Err(SdkError::Config(
                "shared buffer capacity must be greater than zero".into(),
            ));
        }

        let (commands, rx) = crossbeam_channel::unbounded();
        let core = BufferCore::new(capacity, policy);
        std::thread::Builder::new()
            .name("voicelink-shared-buffer".into())
            .spawn(move || core.run(rx))
            .map_err(|e| SdkError::Audio(format!("cannot spawn shared buffer thread: {e}")))?;

        debug!(capacity, ?policy, "shared buffer created");

        Ok(Self {
            shared: Arc::new(Shared {
                capacity,
                current_writer: AtomicU64::new(NO_WRITER),
                last_writer_id: Mutex::new(NO_WRITER),
            }),
            commands,
        })
    }
}

impl<T> SharedBuffer<T> {
    /// Number of elements the buffer retains.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Create the buffer's writer, superseding any previous writer.
    ///
    /// Writes from a superseded writer fail with
    /// [`BufferError::WritePermissionDenied`]. Creating a writer after the
    /// stream finished re-opens it for new writes.
    pub fn make_writer(&self) -> Writer<T> {
        let mut last = self
            .shared
            .last_writer_id
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *last += 1;
        let writer_id = *last;
        let previous = self
            .shared
            .current_writer
            .swap(writer_id, Ordering::AcqRel);
        let _ = self.commands.send(Command::SetWriter { writer_id });
        drop(last);

        if previous != NO_WRITER {
            debug!(previous, writer_id, "shared buffer writer superseded");
        }

        Writer {
            id: writer_id,
            shared: Arc::clone(&self.shared),
            commands: self.commands.clone(),
        }
    }

    /// Create an independent reader starting at the current write position.
    ///
    /// The reader sees every element written after this call returns and
    /// nothing written before it.
    pub fn make_reader(&self) -> Reader<T> {
        let (reply, start) = oneshot::channel();
        let _ = self.commands.send(Command::Attach { reply });

        Reader {
            position: None,
            start: Some(start),
            commands: self.commands.clone(),
        }
    }
}

/// The exclusive producer handle of a [`SharedBuffer`].
///
/// Dropping the current writer finishes the stream.
pub struct Writer<T> {
    id: u64,
    shared: Arc<Shared>,
    commands: Sender<Command<T>>,
}

impl<T> Writer<T> {
    /// Append an element and wake every reader waiting for it.
    ///
    /// Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::WritePermissionDenied`] if another writer has
    /// been created since this one; the buffer is left untouched.
    pub fn write(&self, element: T) -> std::result::Result<(), BufferError> {
        if !self.is_current() {
            return Err(BufferError::WritePermissionDenied);
        }
        self.commands
            .send(Command::Write {
                writer_id: self.id,
                element,
            })
            .map_err(|_| BufferError::WriterFinished)
    }

    /// Whether this handle is still the buffer's writer.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.shared.current_writer.load(Ordering::Acquire) == self.id
    }

    /// End the stream.
    ///
    /// Suspended reads, and reads past the last written element, complete
    /// with [`BufferError::WriterFinished`]. A superseded writer finishing
    /// has no effect on the stream.
    pub fn finish(self) {
        debug!(writer_id = self.id, "shared buffer writer finishing");
    }
}

impl<T> Drop for Writer<T> {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Finish { writer_id: self.id });
    }
}

/// An independent consumer of a [`SharedBuffer`].
pub struct Reader<T> {
    position: Option<u64>,
    start: Option<oneshot::Receiver<u64>>,
    commands: Sender<Command<T>>,
}

impl<T: Send + 'static> Reader<T> {
    /// Read the element at this reader's cursor, waiting for it if needed.
    ///
    /// Completes immediately when the element is already written; otherwise
    /// suspends the calling task (not the buffer) until the writer publishes
    /// it or finishes. The cursor advances by one per successful read.
    ///
    /// Dropping the returned future before it completes leaves the cursor
    /// where it was.
    ///
    /// # Errors
    ///
    /// [`BufferError::WriterFinished`] once the stream has ended, or
    /// [`BufferError::Overrun`] under [`OverrunPolicy::Report`].
    pub async fn read(&mut self) -> std::result::Result<T, BufferError> {
        let position = self.resolve_position().await?;

        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Read { position, reply })
            .map_err(|_| BufferError::WriterFinished)?;

        let outcome = outcome.await.map_err(|_| BufferError::WriterFinished)?;
        self.position = Some(outcome.next_position);
        outcome.result
    }

    /// The absolute stream position this reader reads next, once known.
    #[must_use]
    pub fn position(&self) -> Option<u64> {
        self.position
    }

    /// Turn the reader into a stream that ends when the writer finishes.
    pub fn into_stream(mut self) -> impl Stream<Item = std::result::Result<T, BufferError>> {
        async_stream::stream! {
            loop {
                match self.read().await {
                    Err(BufferError::WriterFinished) => break,
                    item => yield item,
                }
            }
        }
    }

    async fn resolve_position(&mut self) -> std::result::Result<u64, BufferError> {
        if let Some(position) = self.position {
            return Ok(position);
        }
        let start = match self.start.as_mut() {
            Some(start) => start.await.map_err(|_| BufferError::WriterFinished)?,
            None => return Err(BufferError::WriterFinished),
        };
        self.start = None;
        self.position = Some(start);
        Ok(start)
    }
}

/// Buffer state owned by the coordination thread.
struct BufferCore<T> {
    slots: Vec<Option<T>>,
    policy: OverrunPolicy,
    /// Total number of elements written since creation.
    written: u64,
    writer_id: u64,
    finished: bool,
    pending: Vec<PendingRead<T>>,
}

impl<T: Clone> BufferCore<T> {
    fn new(capacity: usize, policy: OverrunPolicy) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            policy,
            written: 0,
            writer_id: NO_WRITER,
            finished: false,
            pending: Vec::new(),
        }
    }

    fn run(mut self, commands: Receiver<Command<T>>) {
        while let Ok(command) = commands.recv() {
            self.apply(command);
        }
        // Every handle is gone; dropping `pending` fails the remaining reads.
        trace!(written = self.written, "shared buffer thread exiting");
    }

    fn apply(&mut self, command: Command<T>) {
        match command {
            Command::SetWriter { writer_id } => {
                self.writer_id = writer_id;
                self.finished = false;
            }
            Command::Write { writer_id, element } => {
                if writer_id != self.writer_id {
                    warn!(writer_id, "dropping write from superseded writer");
                    return;
                }
                self.write(element);
            }
            Command::Finish { writer_id } => {
                if writer_id == self.writer_id && !self.finished {
                    self.finish();
                }
            }
            Command::Attach { reply } => {
                let _ = reply.send(self.written);
            }
            Command::Read { position, reply } => self.read(position, reply),
        }
    }

    fn slot_index(&self, position: u64) -> usize {
        (position % self.slots.len() as u64) as usize
    }

    fn write(&mut self, element: T) {
        let position = self.written;
        let index = self.slot_index(position);
        self.slots[index] = Some(element);
        self.written += 1;

        if self.pending.is_empty() {
            return;
        }
        let waiting = std::mem::take(&mut self.pending);
        for pending in waiting {
            if pending.reply.is_closed() {
                continue;
            }
            if pending.position == position {
                let result = self.slots[index]
                    .clone()
                    .ok_or(BufferError::WriterFinished);
                let _ = pending.reply.send(ReadOutcome {
                    result,
                    next_position: position + 1,
                });
            } else {
                self.pending.push(pending);
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        debug!(
            written = self.written,
            waiting = self.pending.len(),
            "shared buffer finished"
        );
        for pending in self.pending.drain(..) {
            let _ = pending.reply.send(ReadOutcome {
                result: Err(BufferError::WriterFinished),
                next_position: pending.position,
            });
        }
    }

    fn read(&mut self, position: u64, reply: oneshot::Sender<ReadOutcome<T>>) {
        if position >= self.written {
            if self.finished {
                let _ = reply.send(ReadOutcome {
                    result: Err(BufferError::WriterFinished),
                    next_position: position,
                });
            } else {
                self.pending.push(PendingRead { position, reply });
            }
            return;
        }

        let capacity = self.slots.len() as u64;
        let lag = self.written - position;
        if lag > capacity && self.policy == OverrunPolicy::Report {
            let _ = reply.send(ReadOutcome {
                result: Err(BufferError::Overrun {
                    lagged: lag - capacity,
                }),
                next_position: self.written - capacity,
            });
            return;
        }

        let index = self.slot_index(position);
        let result = self.slots[index]
            .clone()
            .ok_or(BufferError::WriterFinished);
        let _ = reply.send(ReadOutcome {
            result,
            next_position: position + 1,
        });
    }
}
