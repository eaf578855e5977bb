use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Lifecycle of a session.
///
/// When both halves close before the session finishes, the state keeps the
/// half that closed first until it becomes `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    HandshakeInFlight,
    Active,
    /// No more items will be delivered
    ReadHalfClosed,
    /// No more commits will be sent
    WriteHalfClosed,
    Terminated,
}

/// Counters describing what a session has done so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub items_received: u64,
    pub heartbeats_received: u64,
    pub commits_written: u64,
    pub last_committed_offset: Option<i64>,
}

/// State shared by the session and its worker threads.
pub(crate) struct SessionShared {
    label: String,
    state: Mutex<SessionState>,
    items_received: AtomicU64,
    heartbeats_received: AtomicU64,
    commits_written: AtomicU64,
    last_committed_offset: Mutex<Option<i64>>,
}

impl SessionShared {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(SessionState::Created),
            items_received: AtomicU64::new(0),
            heartbeats_received: AtomicU64::new(0),
            commits_written: AtomicU64::new(0),
            last_committed_offset: Mutex::new(None),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_state(&self, next: SessionState) {
        self.transition(|_| Some(next));
    }

    pub fn close_read_half(&self) {
        self.transition(|current| (current == SessionState::Active).then_some(SessionState::ReadHalfClosed));
    }

    pub fn close_write_half(&self) {
        self.transition(|current| (current == SessionState::Active).then_some(SessionState::WriteHalfClosed));
    }

    fn transition(&self, next: impl FnOnce(SessionState) -> Option<SessionState>) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state == SessionState::Terminated {
            return;
        }
        if let Some(next) = next(*state) {
            if next != *state {
                log::debug!("🔀 [{}] {:?} -> {:?}", self.label, *state, next);
                *state = next;
            }
        }
    }

    pub fn record_item(&self) {
        self.items_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self, offset: i64) {
        self.commits_written.fetch_add(1, Ordering::Relaxed);
        *self
            .last_committed_offset
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(offset);
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            items_received: self.items_received.load(Ordering::Relaxed),
            heartbeats_received: self.heartbeats_received.load(Ordering::Relaxed),
            commits_written: self.commits_written.load(Ordering::Relaxed),
            last_committed_offset: *self
                .last_committed_offset
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }
}
