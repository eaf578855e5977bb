//! A minimal background task: one named OS thread, a cancellation token
//! and a single-slot result.

use crate::channel::Selectable;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Select, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task '{0}' has not finished yet")]
    Pending(String),

    #[error("task '{0}' panicked")]
    Panicked(String),
}

/// Cooperative cancellation flag shared between a task and its owner.
///
/// Work functions poll [`is_cancelled`](Self::is_cancelled) or wait on
/// [`signal`](Self::signal), which becomes ready once cancelled.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    signal_tx: Arc<Mutex<Option<Sender<()>>>>,
    signal_rx: Receiver<()>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (signal_tx, signal_rx) = bounded(0);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            signal_tx: Arc::new(Mutex::new(Some(signal_tx))),
            signal_rx,
        }
    }

    /// Cancel. Returns true only for the call that flipped the flag.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.signal_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that is disconnected (hence always ready) once cancelled
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal_rx
    }

    /// Sleep for up to `timeout`, waking early on cancellation.
    /// Returns whether the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.signal_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => self.is_cancelled(),
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Selectable for CancellationToken {
    fn register<'a>(&'a self, select: &mut Select<'a>) -> Vec<usize> {
        vec![select.recv(&self.signal_rx)]
    }
}

/// Marks the task done even if the work function panics.
struct DoneGuard(Arc<AtomicBool>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct Task<T> {
    name: String,
    token: CancellationToken,
    done: Arc<AtomicBool>,
    result_rx: Receiver<T>,
    result: Option<T>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Task<T> {
    /// Start `work` on a new named thread. Returns once the thread is
    /// running, not once `work` completes.
    pub fn start<F>(name: impl Into<String>, work: F) -> std::io::Result<Self>
    where
        F: FnOnce(CancellationToken) -> T + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let done = Arc::new(AtomicBool::new(false));
        let (result_tx, result_rx) = bounded(1);
        let (started_tx, started_rx) = bounded::<()>(1);

        let handle = {
            let token = token.clone();
            let done = Arc::clone(&done);
            thread::Builder::new().name(name.clone()).spawn(move || {
                let _done = DoneGuard(done);
                let _ = started_tx.send(());
                let result = work(token);
                let _ = result_tx.send(result);
            })?
        };

        // The sender only goes away without a message if the thread died first
        let _ = started_rx.recv();
        log::trace!("🧵 Task '{}' started", name);

        Ok(Self {
            name,
            token,
            done,
            result_rx,
            result: None,
            handle: Some(handle),
        })
    }
}

impl<T> Task<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle on this task's cancellation token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Non-blocking completion check
    pub fn is_done(&self) -> bool {
        self.result.is_some() || self.done.load(Ordering::SeqCst)
    }

    /// Request cancellation. Does nothing once the task has completed;
    /// returns whether the request was delivered.
    pub fn cancel(&self) -> bool {
        if self.is_done() {
            return false;
        }
        let delivered = self.token.cancel();
        if delivered {
            log::debug!("🛑 Cancelled task '{}'", self.name);
        }
        delivered
    }

    /// Wait up to `timeout` for the task's result.
    pub fn get_result(&mut self, timeout: Duration) -> Result<&T, TaskError> {
        if self.result.is_none() {
            match self.result_rx.recv_timeout(timeout) {
                Ok(result) => self.store(result),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(TaskError::Pending(self.name.clone()))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TaskError::Panicked(self.name.clone()))
                }
            }
        }
        self.result
            .as_ref()
            .ok_or_else(|| TaskError::Pending(self.name.clone()))
    }

    /// Block until the task's result is available.
    pub fn wait(&mut self) -> Result<&T, TaskError> {
        if self.result.is_none() {
            match self.result_rx.recv() {
                Ok(result) => self.store(result),
                Err(_) => return Err(TaskError::Panicked(self.name.clone())),
            }
        }
        self.result
            .as_ref()
            .ok_or_else(|| TaskError::Panicked(self.name.clone()))
    }

    /// Block until done and take the result.
    pub fn join(mut self) -> Result<T, TaskError> {
        self.wait()?;
        self.result
            .take()
            .ok_or_else(|| TaskError::Panicked(self.name.clone()))
    }

    fn store(&mut self, result: T) {
        self.result = Some(result);
        // The thread is past its last statement; reap it
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl<T> Selectable for Task<T> {
    fn register<'a>(&'a self, select: &mut Select<'a>) -> Vec<usize> {
        vec![select.recv(&self.result_rx)]
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if self.handle.is_some() && !self.is_done() {
            // Detach rather than block: the work may be stuck in I/O that
            // only its owner knows how to interrupt.
            self.token.cancel();
            log::debug!("🧵 Detaching unfinished task '{}'", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::select_readable;
    use std::time::Instant;

    #[test]
    fn test_result_is_available_after_completion() {
        let mut task = Task::start("adder", |_| 40 + 2).unwrap();
        assert_eq!(task.get_result(Duration::from_secs(2)), Ok(&42));
        assert!(task.is_done());
        assert_eq!(task.join(), Ok(42));
    }

    #[test]
    fn test_get_result_times_out_while_running() {
        let mut task = Task::start("sleeper", |token: CancellationToken| {
            token.wait_timeout(Duration::from_secs(5))
        })
        .unwrap();

        assert_eq!(
            task.get_result(Duration::from_millis(20)),
            Err(TaskError::Pending("sleeper".to_string()))
        );
        assert!(!task.is_done());

        assert!(task.cancel());
        assert!(!task.cancel());
        assert_eq!(task.join(), Ok(true));
    }

    #[test]
    fn test_cancel_after_completion_is_a_no_op() {
        let mut task = Task::start("quick", |_| "done").unwrap();
        task.wait().unwrap();

        assert!(!task.cancel());
        assert!(!task.token().is_cancelled());
    }

    #[test]
    fn test_panicking_work_is_reported() {
        let task: Task<u8> = Task::start("boom", |_| panic!("boom")).unwrap();
        assert_eq!(task.join(), Err(TaskError::Panicked("boom".to_string())));
    }

    #[test]
    fn test_select_waits_for_first_finished_task() {
        let slow = Task::start("slow", |token: CancellationToken| {
            token.wait_timeout(Duration::from_secs(5));
        })
        .unwrap();
        let fast = Task::start("fast", |_| thread::sleep(Duration::from_millis(20))).unwrap();

        let started = Instant::now();
        assert_eq!(select_readable(&[&slow, &fast], None), Some(1));
        assert!(started.elapsed() < Duration::from_secs(2));

        slow.cancel();
    }

    #[test]
    fn test_dropping_unfinished_task_cancels_it() {
        let (seen_tx, seen_rx) = bounded(1);
        let task = Task::start("dropped", move |token: CancellationToken| {
            let cancelled = token.wait_timeout(Duration::from_secs(5));
            let _ = seen_tx.send(cancelled);
        })
        .unwrap();

        drop(task);
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2)), Ok(true));
    }
}
