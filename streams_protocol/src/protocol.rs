use crate::status::Status;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::TcpStream;
use thiserror::Error;

/// Largest frame payload accepted from the wire (16MB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid frame type: {0:#04x}")]
    InvalidFrameType(u8),

    #[error("Invalid payload size: {0}")]
    InvalidPayloadSize(u32),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected frame: {0:?}")]
    UnexpectedFrame(FrameType),
}

impl ProtocolError {
    /// True when the error means the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Describes what a packet carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PacketType {
    /// Broad family, e.g. "gst" or "protobuf"
    pub type_class: String,
    /// Concrete type inside the family, e.g. "video/x-h264"
    pub type_name: String,
}

impl PacketType {
    pub fn new(type_class: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            type_class: type_class.into(),
            type_name: type_name.into(),
        }
    }
}

/// Fields stamped by the server when it ingests a packet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerMetadata {
    /// Checkpoint position of this packet within its event
    pub offset: i64,
    /// Unix timestamp in milliseconds when the server accepted the packet
    pub ingest_time_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PacketHeader {
    /// Unix timestamp in milliseconds when the payload was captured
    pub capture_time_ms: u64,
    pub packet_type: PacketType,
    /// Free-form metadata attached by the sender
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub server_metadata: ServerMetadata,
}

/// One data item of a packet stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(packet_type: PacketType, payload: Vec<u8>, offset: i64) -> Self {
        Self {
            header: PacketHeader {
                capture_time_ms: now_millis(),
                packet_type,
                metadata: serde_json::Map::new(),
                server_metadata: ServerMetadata {
                    offset,
                    ingest_time_ms: now_millis(),
                },
            },
            payload,
        }
    }

    pub fn offset(&self) -> i64 {
        self.header.server_metadata.offset
    }
}

/// Notification that an event of a stream changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventUpdate {
    pub stream: String,
    pub event: String,
    /// Series the update was written to
    pub series: String,
    /// Unix timestamp in milliseconds of the update
    pub update_time_ms: u64,
    pub offset: i64,
}

/// Payload-free control messages sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Heartbeat,
    /// The server will send no more data; the client should stop writing
    WritesDoneRequest,
}

/// Everything the server may send after setup, for one item type.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage<T> {
    Data(T),
    Control(ControlSignal),
}

/// How a packet reader positions itself in the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveModeSetup {
    /// No offset tracking; the server streams from "now"
    Eager,
    /// The server remembers committed offsets for this receiver
    Controlled {
        starting_offset: String,
        fallback_offset: String,
        lease_term_ms: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceivePacketsSetup {
    pub cluster: String,
    pub stream: String,
    pub event: String,
    pub receiver: String,
    pub mode: ReceiveModeSetup,
    pub heartbeat_interval_ms: u64,
    pub writes_done_grace_period_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiveEventsSetup {
    pub cluster: String,
    pub stream: String,
    pub receiver: String,
    pub starting_offset: String,
    pub fallback_offset: String,
    pub heartbeat_interval_ms: u64,
    pub writes_done_grace_period_ms: u64,
}

/// First message of every session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SetupRequest {
    Packets(ReceivePacketsSetup),
    EventUpdates(ReceiveEventsSetup),
}

/// Asks the server to persist read progress up to and including `offset`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitRequest {
    pub offset: i64,
}

/// Everything the client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Setup(SetupRequest),
    Commit(CommitRequest),
}

/// Frame types on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    // Client → Server
    Setup = 0x01,
    Commit = 0x02,

    // Server → Client
    Packet = 0x10,
    EventUpdate = 0x11,
    Heartbeat = 0x12,
    WritesDoneRequest = 0x13,
    Status = 0x14,
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameType::Setup),
            0x02 => Ok(FrameType::Commit),
            0x10 => Ok(FrameType::Packet),
            0x11 => Ok(FrameType::EventUpdate),
            0x12 => Ok(FrameType::Heartbeat),
            0x13 => Ok(FrameType::WritesDoneRequest),
            0x14 => Ok(FrameType::Status),
            _ => Err(ProtocolError::InvalidFrameType(value)),
        }
    }
}

/// A single framed message in either direction
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Setup(SetupRequest),
    Commit(CommitRequest),
    Packet(Packet),
    EventUpdate(EventUpdate),
    Heartbeat,
    WritesDoneRequest,
    /// Trailer: the server's terminal status, always the last frame it sends
    Status(Status),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Setup(_) => FrameType::Setup,
            Frame::Commit(_) => FrameType::Commit,
            Frame::Packet(_) => FrameType::Packet,
            Frame::EventUpdate(_) => FrameType::EventUpdate,
            Frame::Heartbeat => FrameType::Heartbeat,
            Frame::WritesDoneRequest => FrameType::WritesDoneRequest,
            Frame::Status(_) => FrameType::Status,
        }
    }

    /// Serialize to `[frame_type: u8][payload_size: u32 LE][payload: JSON]`
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = match self {
            Frame::Heartbeat | Frame::WritesDoneRequest => Vec::new(),
            Frame::Setup(setup) => serde_json::to_vec(setup)?,
            Frame::Commit(commit) => serde_json::to_vec(commit)?,
            Frame::Packet(packet) => serde_json::to_vec(packet)?,
            Frame::EventUpdate(update) => serde_json::to_vec(update)?,
            Frame::Status(status) => serde_json::to_vec(status)?,
        };

        if payload.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::InvalidPayloadSize(payload.len() as u32));
        }

        let mut bytes = Vec::with_capacity(5 + payload.len());
        bytes.push(self.frame_type() as u8);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);

        Ok(bytes)
    }

    pub fn from_bytes(frame_type: FrameType, payload: &[u8]) -> Result<Self, ProtocolError> {
        match frame_type {
            FrameType::Heartbeat => Ok(Frame::Heartbeat),
            FrameType::WritesDoneRequest => Ok(Frame::WritesDoneRequest),
            FrameType::Setup => Ok(Frame::Setup(serde_json::from_slice(payload)?)),
            FrameType::Commit => Ok(Frame::Commit(serde_json::from_slice(payload)?)),
            FrameType::Packet => Ok(Frame::Packet(serde_json::from_slice(payload)?)),
            FrameType::EventUpdate => Ok(Frame::EventUpdate(serde_json::from_slice(payload)?)),
            FrameType::Status => Ok(Frame::Status(serde_json::from_slice(payload)?)),
        }
    }

    /// Interpret a frame received by a server.
    pub fn into_client_message(self) -> Result<ClientMessage, ProtocolError> {
        match self {
            Frame::Setup(setup) => Ok(ClientMessage::Setup(setup)),
            Frame::Commit(commit) => Ok(ClientMessage::Commit(commit)),
            other => Err(ProtocolError::UnexpectedFrame(other.frame_type())),
        }
    }
}

impl From<ClientMessage> for Frame {
    fn from(message: ClientMessage) -> Self {
        match message {
            ClientMessage::Setup(setup) => Frame::Setup(setup),
            ClientMessage::Commit(commit) => Frame::Commit(commit),
        }
    }
}

impl<T: StreamItem> From<ServerMessage<T>> for Frame {
    fn from(message: ServerMessage<T>) -> Self {
        match message {
            ServerMessage::Data(item) => item.into_frame(),
            ServerMessage::Control(ControlSignal::Heartbeat) => Frame::Heartbeat,
            ServerMessage::Control(ControlSignal::WritesDoneRequest) => Frame::WritesDoneRequest,
        }
    }
}

/// A data item type that can travel over a receive session.
pub trait StreamItem: Debug + Send + 'static {
    /// Human readable name used in logs
    const KIND: &'static str;

    /// Server-assigned checkpoint position of this item
    fn offset(&self) -> i64;

    fn into_frame(self) -> Frame;

    /// Extract an item from a data frame, handing the frame back if it
    /// carries some other item type.
    fn from_frame(frame: Frame) -> Result<Self, Frame>
    where
        Self: Sized;
}

impl StreamItem for Packet {
    const KIND: &'static str = "packet";

    fn offset(&self) -> i64 {
        Packet::offset(self)
    }

    fn into_frame(self) -> Frame {
        Frame::Packet(self)
    }

    fn from_frame(frame: Frame) -> Result<Self, Frame> {
        match frame {
            Frame::Packet(packet) => Ok(packet),
            other => Err(other),
        }
    }
}

impl StreamItem for EventUpdate {
    const KIND: &'static str = "event update";

    fn offset(&self) -> i64 {
        self.offset
    }

    fn into_frame(self) -> Frame {
        Frame::EventUpdate(self)
    }

    fn from_frame(frame: Frame) -> Result<Self, Frame> {
        match frame {
            Frame::EventUpdate(update) => Ok(update),
            other => Err(other),
        }
    }
}

/// Read half of a framed TCP connection
pub struct FrameReader {
    reader: BufReader<TcpStream>,
}

impl FrameReader {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    pub fn read_frame(&mut self) -> Result<Frame, ProtocolError> {
        // Read frame type (1 byte)
        let mut type_byte = [0u8; 1];
        self.reader.read_exact(&mut type_byte)?;
        let frame_type = FrameType::try_from(type_byte[0])?;

        // Read payload size (4 bytes, little endian)
        let mut size_bytes = [0u8; 4];
        self.reader.read_exact(&mut size_bytes)?;
        let payload_size = u32::from_le_bytes(size_bytes);

        if payload_size > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::InvalidPayloadSize(payload_size));
        }

        let mut payload = vec![0u8; payload_size as usize];
        if payload_size > 0 {
            self.reader.read_exact(&mut payload)?;
        }

        Frame::from_bytes(frame_type, &payload)
    }

    pub fn get_ref(&self) -> &TcpStream {
        self.reader.get_ref()
    }
}

/// Write half of a framed TCP connection
pub struct FrameWriter {
    writer: BufWriter<TcpStream>,
}

impl FrameWriter {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            writer: BufWriter::new(stream),
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let bytes = frame.to_bytes()?;
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &TcpStream {
        self.writer.get_ref()
    }
}

/// TCP connection wrapper speaking the frame protocol in both directions.
pub struct Connection {
    reader: FrameReader,
    writer: FrameWriter,
}

impl Connection {
    /// Create a new connection from a TCP stream
    pub fn new(stream: TcpStream) -> Result<Self, ProtocolError> {
        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Connection {
            reader: FrameReader::new(read_stream),
            writer: FrameWriter::new(write_stream),
        })
    }

    pub fn read_frame(&mut self) -> Result<Frame, ProtocolError> {
        self.reader.read_frame()
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        self.writer.write_frame(frame)
    }

    /// Split into independently owned halves so reads and writes can
    /// proceed from different threads.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        (self.reader, self.writer)
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;

    fn decode(bytes: &[u8]) -> Frame {
        let frame_type = FrameType::try_from(bytes[0]).unwrap();
        let size = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        assert_eq!(bytes.len(), 5 + size);
        Frame::from_bytes(frame_type, &bytes[5..]).unwrap()
    }

    #[test]
    fn test_control_frames_have_empty_payload() {
        let bytes = Frame::Heartbeat.to_bytes().unwrap();
        assert_eq!(bytes, vec![0x12, 0, 0, 0, 0]);

        let bytes = Frame::WritesDoneRequest.to_bytes().unwrap();
        assert_eq!(bytes, vec![0x13, 0, 0, 0, 0]);
    }

    #[test]
    fn test_setup_frame_survives_encoding() {
        let setup = SetupRequest::Packets(ReceivePacketsSetup {
            cluster: "cluster-a".to_string(),
            stream: "camera-1".to_string(),
            event: "event-7".to_string(),
            receiver: "ingester".to_string(),
            mode: ReceiveModeSetup::Controlled {
                starting_offset: "stored".to_string(),
                fallback_offset: "begin".to_string(),
                lease_term_ms: 10_000,
            },
            heartbeat_interval_ms: 5_000,
            writes_done_grace_period_ms: 5_000,
        });

        let frame = Frame::Setup(setup.clone());
        match decode(&frame.to_bytes().unwrap()).into_client_message().unwrap() {
            ClientMessage::Setup(decoded) => assert_eq!(decoded, setup),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_frame_type_is_rejected() {
        assert!(matches!(
            FrameType::try_from(0x7f),
            Err(ProtocolError::InvalidFrameType(0x7f))
        ));
    }

    #[test]
    fn test_server_frames_are_not_client_messages() {
        let err = Frame::Status(Status::new(StatusCode::OutOfRange, "done"))
            .into_client_message()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedFrame(FrameType::Status)));
    }

    #[test]
    fn test_stream_item_rejects_other_item_frames() {
        let update = EventUpdate {
            stream: "s".to_string(),
            event: "e".to_string(),
            series: "series".to_string(),
            update_time_ms: 1,
            offset: 3,
        };
        let frame: Frame = ServerMessage::Data(update.clone()).into();

        assert!(<Packet as StreamItem>::from_frame(frame.clone()).is_err());
        assert_eq!(EventUpdate::from_frame(frame).unwrap(), update);
    }
}
