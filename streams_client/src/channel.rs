//! Closeable, fixed-capacity blocking queue used for every hand-off between
//! a session's threads.

use crate::task::CancellationToken;
use crossbeam_channel::{bounded, Receiver, Select, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a channel operation did not complete.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// Nothing happened before the timeout; the channel is still open
    #[error("timed out")]
    Timeout,
    /// The channel is closed (and, for reads, drained)
    #[error("channel closed")]
    Closed,
}

/// A failed write, handing the value back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteError<T> {
    Timeout(T),
    Closed(T),
}

impl<T> WriteError<T> {
    pub fn into_inner(self) -> T {
        match self {
            WriteError::Timeout(value) | WriteError::Closed(value) => value,
        }
    }

    pub fn kind(&self) -> ChannelError {
        match self {
            WriteError::Timeout(_) => ChannelError::Timeout,
            WriteError::Closed(_) => ChannelError::Closed,
        }
    }
}

/// Something [`select_readable`] can wait on.
pub trait Selectable {
    /// Register every receive operation whose readiness means this source
    /// fired, returning their operation indices.
    fn register<'a>(&'a self, select: &mut Select<'a>) -> Vec<usize>;
}

pub struct BoundedChannel<T> {
    name: &'static str,
    tx: Sender<T>,
    rx: Receiver<T>,
    closed: AtomicBool,
    // Dropping this sender disconnects `close_rx`, which wakes every waiter
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
}

impl<T> BoundedChannel<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        let (close_tx, close_rx) = bounded(0);

        Self {
            name,
            tx,
            rx,
            closed: AtomicBool::new(false),
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(1)
    }

    /// Number of values waiting to be read
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the channel. Idempotent; wakes all blocked readers and writers.
    /// Values already queued can still be read.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut close_tx = self
            .close_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        close_tx.take();
        log::trace!("🔒 Channel '{}' closed", self.name);
    }

    /// Write `value`, blocking until there is room, the channel closes or
    /// `timeout` elapses.
    pub fn write(&self, value: T, timeout: Duration) -> Result<(), WriteError<T>> {
        let deadline = Instant::now() + timeout;
        let mut value = value;

        loop {
            if self.is_closed() {
                return Err(WriteError::Closed(value));
            }

            match self.tx.try_send(value) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(returned)) | Err(TrySendError::Disconnected(returned)) => {
                    value = returned;
                }
            }

            let mut select = Select::new();
            select.send(&self.tx);
            select.recv(&self.close_rx);
            if select.ready_deadline(deadline).is_err() {
                return Err(WriteError::Timeout(value));
            }
        }
    }

    /// Read a value, blocking until one is available, the channel is closed
    /// and drained, or `timeout` elapses.
    pub fn read(&self, timeout: Duration) -> Result<T, ChannelError> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.rx.try_recv() {
                Ok(value) => return Ok(value),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }

            if self.is_closed() {
                return Err(ChannelError::Closed);
            }

            let mut select = Select::new();
            select.recv(&self.rx);
            select.recv(&self.close_rx);
            if select.ready_deadline(deadline).is_err() {
                return Err(ChannelError::Timeout);
            }
        }
    }

    /// Write `value`, retrying in `poll` slices until it is accepted, the
    /// channel closes or `token` is cancelled.
    pub fn write_until_cancelled(
        &self,
        value: T,
        token: &CancellationToken,
        poll: Duration,
    ) -> Result<(), ChannelError> {
        let mut value = value;
        loop {
            match self.write(value, poll) {
                Ok(()) => return Ok(()),
                Err(WriteError::Closed(_)) => return Err(ChannelError::Closed),
                Err(WriteError::Timeout(returned)) => {
                    if token.is_cancelled() {
                        return Err(ChannelError::Closed);
                    }
                    value = returned;
                }
            }
        }
    }
}

impl<T> Selectable for BoundedChannel<T> {
    fn register<'a>(&'a self, select: &mut Select<'a>) -> Vec<usize> {
        vec![select.recv(&self.rx), select.recv(&self.close_rx)]
    }
}

/// Block until at least one source has data or is closed, returning its
/// index in `sources`. `None` only when `timeout` elapses first.
pub fn select_readable(sources: &[&dyn Selectable], timeout: Option<Duration>) -> Option<usize> {
    let mut select = Select::new();
    let mut owners = Vec::new();
    for (index, source) in sources.iter().enumerate() {
        for operation in source.register(&mut select) {
            owners.push((operation, index));
        }
    }

    let ready = match timeout {
        Some(timeout) => select.ready_timeout(timeout).ok()?,
        None => select.ready(),
    };

    owners
        .iter()
        .find(|(operation, _)| *operation == ready)
        .map(|(_, index)| *index)
}
