use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use streams_protocol::{ClientMessage, RawStream, ServerMessage, Status};

/// Shared wrapper around a session's transport that forwards `cancel` and
/// `finish` to it at most once, whichever thread asks first.
pub(crate) struct StreamHandle<T> {
    inner: Arc<dyn RawStream<T>>,
    cancelled: AtomicBool,
    finished: AtomicBool,
}

impl<T> StreamHandle<T> {
    pub fn new(inner: Arc<dyn RawStream<T>>) -> Self {
        Self {
            inner,
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    pub fn write(&self, message: &ClientMessage) -> bool {
        self.inner.write(message)
    }

    pub fn read(&self) -> Option<ServerMessage<T>> {
        self.inner.read()
    }

    pub fn half_close_writes(&self) -> bool {
        self.inner.half_close_writes()
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            log::debug!("✂️ Cancelling stream");
            self.inner.cancel();
        }
    }

    /// The stream's terminal status. Only the first call reaches the
    /// transport; later calls report a failed precondition.
    pub fn finish(&self) -> Status {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Status::failed_precondition("stream already finished");
        }
        self.inner.finish()
    }
}
