//! # Streams Protocol
//!
//! Wire model and blocking TCP transport for leased, checkpointable packet
//! and event-update streams.
//!
//! This crate provides:
//! - The message model (packets, event updates, control signals, setup and commit requests)
//! - A length-prefixed frame codec and a framed TCP `Connection`
//! - `Status` / `StatusCode`, the terminal outcome of a stream
//! - The [`RawStream`] transport trait and its TCP implementation, [`TcpRawStream`]
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use streams_protocol::{ClientMessage, CommitRequest, Packet, RawStream, TcpRawStream};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpRawStream::<Packet>::connect("127.0.0.1:50061")?;
//!
//! // (a setup request must be the first message written)
//! while let Some(message) = stream.read() {
//!     println!("received {:?}", message);
//! }
//! stream.write(&ClientMessage::Commit(CommitRequest { offset: 42 }));
//! stream.half_close_writes();
//! println!("stream ended with {}", stream.finish());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod protocol;
pub mod status;
pub mod stream;

// Re-export commonly used types
pub use client::TcpRawStream;
pub use protocol::{
    ClientMessage, CommitRequest, Connection, ControlSignal, EventUpdate, Frame, FrameType,
    Packet, PacketHeader, PacketType, ProtocolError, ReceiveEventsSetup, ReceiveModeSetup,
    ReceivePacketsSetup, ServerMessage, ServerMetadata, SetupRequest, StreamItem,
};
pub use status::{Status, StatusCode};
pub use stream::RawStream;
