//! A running receive session: the public read/commit API over one stream,
//! backed by a response dispatcher, an offset committer and a supervisor
//! that folds their outcomes into a single status.

use crate::channel::{select_readable, BoundedChannel, ChannelError};
use crate::committer::OffsetCommitter;
use crate::config::AdvancedOptions;
use crate::dispatcher::ResponseDispatcher;
use crate::error::{ClientError, Result};
use crate::handshake::SetupHandshake;
use crate::state::{SessionShared, SessionState, SessionStats};
use crate::stream_handle::StreamHandle;
use crate::task::{CancellationToken, Task, TaskError};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streams_protocol::{RawStream, Status, StreamItem};

pub struct StreamSession<T: StreamItem> {
    stream: Arc<StreamHandle<T>>,
    data: Arc<BoundedChannel<T>>,
    commits: Arc<BoundedChannel<i64>>,
    shared: Arc<SessionShared>,
    dispatcher_token: CancellationToken,
    committer_token: CancellationToken,
    supervisor: Mutex<Option<Task<Status>>>,
    cancelled: AtomicBool,
    finished: AtomicBool,
}

impl<T: StreamItem> StreamSession<T> {
    /// Perform the setup handshake on `stream` and start the session's
    /// background tasks. No session exists unless the handshake succeeds.
    pub fn open(
        label: impl Into<String>,
        stream: Arc<dyn RawStream<T>>,
        handshake: SetupHandshake,
        options: &AdvancedOptions,
    ) -> Result<Self> {
        let shared = Arc::new(SessionShared::new(label));
        let stream = Arc::new(StreamHandle::new(stream));

        shared.set_state(SessionState::HandshakeInFlight);
        if let Err(e) = handshake.perform(&stream) {
            shared.set_state(SessionState::Terminated);
            return Err(e);
        }
        shared.set_state(SessionState::Active);

        let data = Arc::new(BoundedChannel::new("data", options.buffer_capacity));
        let commits = Arc::new(BoundedChannel::new("commits", 1));

        let abort = |task: &'static str, source: std::io::Error| {
            error!("❌ Failed to start {} thread: {}", task, source);
            data.close();
            commits.close();
            stream.cancel();
            stream.finish();
            shared.set_state(SessionState::Terminated);
            ClientError::Spawn { task, source }
        };

        let dispatcher = ResponseDispatcher::new(
            Arc::clone(&stream),
            Arc::clone(&data),
            Arc::clone(&shared),
            options,
        );
        let dispatcher_task = Task::start("response-dispatcher", move |token| dispatcher.run(token))
            .map_err(|e| abort("response-dispatcher", e))?;

        let committer = OffsetCommitter::new(
            Arc::clone(&stream),
            Arc::clone(&commits),
            Arc::clone(&shared),
            options.commit_poll_interval,
        );
        let committer_task = match Task::start("offset-committer", move |token| committer.run(token)) {
            Ok(task) => task,
            Err(e) => {
                dispatcher_task.cancel();
                return Err(abort("offset-committer", e));
            }
        };

        let dispatcher_token = dispatcher_task.token();
        let committer_token = committer_task.token();

        let supervisor = Supervisor {
            stream: Arc::clone(&stream),
            shared: Arc::clone(&shared),
            shutdown_timeout: options.shutdown_timeout,
        };
        // On spawn failure the closure, and with it both tasks, is dropped,
        // which cancels their tokens
        let supervisor_task = Task::start("session-supervisor", move |_| {
            supervisor.run(dispatcher_task, committer_task)
        })
        .map_err(|e| abort("session-supervisor", e))?;

        info!("🚀 [{}] Session active", shared.label());

        Ok(Self {
            stream,
            data,
            commits,
            shared,
            dispatcher_token,
            committer_token,
            supervisor: Mutex::new(Some(supervisor_task)),
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        })
    }

    /// Next data item, in stream order.
    ///
    /// `Err(ChannelError::Timeout)` means nothing arrived yet.
    /// `Err(ChannelError::Closed)` means the read half ended; call
    /// [`commits_done`](Self::commits_done) then [`finish`](Self::finish)
    /// to learn why.
    pub fn receive(&self, timeout: Duration) -> std::result::Result<T, ChannelError> {
        self.data.read(timeout)
    }

    /// Queue a commit of `offset`. `Err(ChannelError::Closed)` means the
    /// write half has closed and further commits are futile.
    pub fn commit(&self, offset: i64, timeout: Duration) -> std::result::Result<(), ChannelError> {
        self.commits.write(offset, timeout).map_err(|e| e.kind())
    }

    /// No more commits will follow. Idempotent.
    pub fn commits_done(&self) {
        debug!("📪 [{}] Commits done", self.shared.label());
        self.commits.close();
    }

    /// Unblock both directions and tear the stream down. Safe to call from
    /// any thread, any number of times, before or after `finish`.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("🛑 [{}] Cancelling session", self.shared.label());

        self.dispatcher_token.cancel();
        self.committer_token.cancel();
        self.data.close();
        self.commits.close();
        self.stream.cancel();
    }

    /// Block until the session is over and return its terminal status.
    ///
    /// Must be called once, after `receive` has reported `Closed` and
    /// `commits_done` was called, or after `cancel`. Otherwise a
    /// failed-precondition status is returned and the session keeps running.
    pub fn finish(&self) -> Status {
        if !self.cancelled.load(Ordering::SeqCst) {
            if !self.commits.is_closed() {
                warn!(
                    "⚠️ [{}] finish() called while the write half is still open",
                    self.shared.label()
                );
                return Status::failed_precondition(
                    "finish called before commits_done or cancel",
                );
            }
            if !(self.data.is_closed() && self.data.is_empty()) {
                warn!(
                    "⚠️ [{}] finish() called before the read half was drained",
                    self.shared.label()
                );
                return Status::failed_precondition(
                    "finish called before receive reported closed, or cancel",
                );
            }
        }

        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(supervisor) = supervisor else {
            return Status::failed_precondition("finish already called");
        };

        let status = match supervisor.join() {
            Ok(status) => status,
            Err(e) => {
                error!("❌ [{}] {}", self.shared.label(), e);
                self.shared.set_state(SessionState::Terminated);
                Status::internal(e.to_string())
            }
        };
        self.finished.store(true, Ordering::SeqCst);
        status
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.stats()
    }
}

impl<T: StreamItem> Drop for StreamSession<T> {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::SeqCst) {
            debug!(
                "🧹 [{}] Session dropped without finish; cancelling",
                self.shared.label()
            );
            self.cancel();
        }
    }
}

/// Waits for the dispatcher and committer and combines their outcomes.
struct Supervisor<T> {
    stream: Arc<StreamHandle<T>>,
    shared: Arc<SessionShared>,
    shutdown_timeout: Duration,
}

impl<T> Supervisor<T> {
    fn run(self, dispatcher: Task<Status>, committer: Task<Status>) -> Status {
        let first_index = select_readable(&[&dispatcher, &committer], None);
        let (mut first, mut second) = match first_index {
            Some(1) => (committer, dispatcher),
            _ => (dispatcher, committer),
        };

        let first_status = outcome(&mut first);
        debug!(
            "🧭 [{}] {} finished first: {}",
            self.shared.label(),
            first.name(),
            first_status
        );

        let overall = if first_status.is_ok() {
            // The other half ends on its own: the dispatcher is bounded by
            // liveness, the committer by the commits_done precondition
            outcome(&mut second)
        } else {
            second.cancel();
            let second_status = self.await_cancelled(&mut second);
            if !second_status.is_ok() {
                debug!(
                    "🧭 [{}] Discarding {} status after earlier failure: {}",
                    self.shared.label(),
                    second.name(),
                    second_status
                );
            }
            first_status
        };

        // No-ops for tasks that already completed
        first.cancel();
        second.cancel();

        let stream_status = self.stream.finish();
        let status = if overall.is_ok() {
            stream_status
        } else {
            if !stream_status.is_ok() {
                debug!(
                    "🧭 [{}] Discarding stream status after task failure: {}",
                    self.shared.label(),
                    stream_status
                );
            }
            overall
        };

        self.shared.set_state(SessionState::Terminated);
        info!("🏁 [{}] Session finished: {}", self.shared.label(), status);
        status
    }

    /// Join a task that has just been cancelled, cancelling the stream if
    /// it is stuck in transport I/O.
    fn await_cancelled(&self, task: &mut Task<Status>) -> Status {
        match task.get_result(self.shutdown_timeout) {
            Ok(status) => return status.clone(),
            Err(TaskError::Pending(_)) => {}
            Err(e) => return Status::internal(e.to_string()),
        }

        warn!(
            "⚠️ [{}] {} still running {:?} after cancel; cancelling stream",
            self.shared.label(),
            task.name(),
            self.shutdown_timeout
        );
        self.stream.cancel();

        match task.get_result(self.shutdown_timeout) {
            Ok(status) => status.clone(),
            Err(e) => {
                error!(
                    "❌ [{}] Giving up on {}: {}",
                    self.shared.label(),
                    task.name(),
                    e
                );
                Status::internal(e.to_string())
            }
        }
    }
}

/// A finished task's status; a panic becomes an internal error.
fn outcome(task: &mut Task<Status>) -> Status {
    match task.wait() {
        Ok(status) => status.clone(),
        Err(e) => {
            error!("❌ {}", e);
            Status::internal(e.to_string())
        }
    }
}
