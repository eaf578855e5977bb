use crate::protocol::{ClientMessage, ServerMessage};
use crate::status::Status;

/// A raw bidirectional message stream.
///
/// Reads and writes are blocking and may run concurrently from two
/// different threads; `cancel` may be called from any thread at any time
/// and must unblock both.
pub trait RawStream<T>: Send + Sync {
    /// Write one message. `false` means the write side is unusable.
    fn write(&self, message: &ClientMessage) -> bool;

    /// Read one message. `None` means the stream ended (cleanly or not);
    /// `finish` tells which.
    fn read(&self) -> Option<ServerMessage<T>>;

    /// Signal that no more messages will be written.
    fn half_close_writes(&self) -> bool;

    /// Abort the stream in both directions.
    fn cancel(&self);

    /// Retrieve the stream's terminal status. Called once, after both
    /// directions are done.
    fn finish(&self) -> Status;
}
