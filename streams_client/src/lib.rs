//! # Streams Client
//!
//! Blocking receive/commit sessions over leased packet and event-update
//! streams.
//!
//! A session sends one setup message, then runs three threads: a
//! response dispatcher (with its own raw-read helper) that delivers data
//! items and enforces heartbeat liveness, an offset committer that forwards
//! commits, and a supervisor that folds their outcomes together with the
//! stream's own status into the value returned by `finish()`.
//!
//! See [`PacketReceiver`] for a complete example.

pub mod channel;
mod committer;
pub mod config;
mod dispatcher;
pub mod error;
pub mod event_update_receiver;
pub mod handshake;
pub mod packet_receiver;
pub mod session;
pub mod state;
mod stream_handle;
pub mod task;

pub use channel::{select_readable, BoundedChannel, ChannelError, Selectable, WriteError};
pub use config::{
    AdvancedOptions, ChannelIdentity, ConfigError, EventUpdateReceiverOptions, OffsetPolicy,
    PacketReceiverOptions, ReceiveMode,
};
pub use error::{ClientError, Result};
pub use event_update_receiver::EventUpdateReceiver;
pub use handshake::SetupHandshake;
pub use packet_receiver::PacketReceiver;
pub use session::StreamSession;
pub use state::{SessionState, SessionStats};
pub use task::{CancellationToken, Task, TaskError};

pub use streams_protocol::{EventUpdate, Packet, RawStream, Status, StatusCode};
