use crate::protocol::{
    ClientMessage, Connection, ControlSignal, Frame, FrameReader, FrameWriter, ProtocolError,
    ServerMessage, StreamItem,
};
use crate::status::Status;
use crate::stream::RawStream;
use log::{debug, error, info, warn};
use std::marker::PhantomData;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// How long `finish` waits for a trailer that has not arrived yet
const TRAILER_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking TCP implementation of [`RawStream`].
///
/// The server ends a session by sending a `Status` frame; that trailer is
/// kept and handed out by `finish`.
pub struct TcpRawStream<T> {
    reader: Mutex<FrameReader>,
    writer: Mutex<FrameWriter>,
    socket: TcpStream,
    server_address: String,
    trailer: Mutex<Option<Status>>,
    ended: AtomicBool,
    cancelled: AtomicBool,
    _item: PhantomData<fn() -> T>,
}

impl<T: StreamItem> TcpRawStream<T> {
    /// Connect to the stream server
    pub fn connect(address: &str) -> Result<Self, ProtocolError> {
        info!("📡 Connecting to stream server at {}", address);

        let stream = TcpStream::connect(address)?;
        let raw = Self::from_tcp_stream(stream, address)?;

        info!("✅ Connected to stream server");
        Ok(raw)
    }

    /// Connect, giving up after `timeout` per resolved address
    pub fn connect_timeout(address: &str, timeout: Duration) -> Result<Self, ProtocolError> {
        info!(
            "📡 Connecting to stream server at {} (timeout {:?})",
            address, timeout
        );

        let mut last_error = None;
        for socket_addr in address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&socket_addr, timeout) {
                Ok(stream) => {
                    info!("✅ Connected to stream server at {}", socket_addr);
                    return Self::from_tcp_stream(stream, address);
                }
                Err(e) => {
                    debug!("⚠️ Connect to {} failed: {}", socket_addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(ProtocolError::Io(last_error.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("{} did not resolve to any address", address),
            )
        })))
    }

    /// Wrap an already connected socket
    pub fn from_tcp_stream(stream: TcpStream, address: &str) -> Result<Self, ProtocolError> {
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

        let socket = stream.try_clone()?;
        let (reader, writer) = Connection::new(stream)?.into_split();

        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            socket,
            server_address: address.to_string(),
            trailer: Mutex::new(None),
            ended: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            _item: PhantomData,
        })
    }

    /// Get the server address this stream is connected to
    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    /// Turn one inbound frame into a message, or `None` if it ends the stream.
    fn classify(&self, frame: Frame) -> Option<ServerMessage<T>> {
        match frame {
            Frame::Heartbeat => Some(ServerMessage::Control(ControlSignal::Heartbeat)),
            Frame::WritesDoneRequest => {
                Some(ServerMessage::Control(ControlSignal::WritesDoneRequest))
            }
            Frame::Status(status) => {
                debug!("📥 Received stream trailer: {}", status);
                self.end_with(Some(status));
                None
            }
            frame => match T::from_frame(frame) {
                Ok(item) => Some(ServerMessage::Data(item)),
                Err(frame) => {
                    error!(
                        "❌ Unexpected {:?} frame on a {} stream",
                        frame.frame_type(),
                        T::KIND
                    );
                    self.end_with(Some(Status::internal(format!(
                        "unexpected {:?} frame on a {} stream",
                        frame.frame_type(),
                        T::KIND
                    ))));
                    None
                }
            },
        }
    }

    fn end_with(&self, status: Option<Status>) {
        self.ended.store(true, Ordering::SeqCst);
        if let Some(status) = status {
            *lock(&self.trailer) = Some(status);
        }
    }

    /// Read frames until the trailer shows up, the peer goes away or the
    /// trailer timeout passes.
    fn await_trailer(&self) {
        let mut reader = lock(&self.reader);
        if let Err(e) = reader.get_ref().set_read_timeout(Some(TRAILER_TIMEOUT)) {
            warn!("⚠️ Could not arm trailer timeout: {}", e);
            return;
        }

        while !self.ended.load(Ordering::SeqCst) {
            match reader.read_frame() {
                Ok(Frame::Status(status)) => self.end_with(Some(status)),
                Ok(frame) => debug!(
                    "🔄 Discarding {:?} frame while waiting for trailer",
                    frame.frame_type()
                ),
                Err(e) => {
                    debug!("🔌 No trailer from server: {}", e);
                    self.end_with(None);
                }
            }
        }
    }
}

impl<T: StreamItem> RawStream<T> for TcpRawStream<T> {
    fn write(&self, message: &ClientMessage) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return false;
        }

        let frame = Frame::from(message.clone());
        match lock(&self.writer).write_frame(&frame) {
            Ok(()) => true,
            Err(e) => {
                if e.is_disconnect() {
                    info!("🔌 Write side closed by server: {}", e);
                } else {
                    error!("❌ Failed to write {:?} frame: {}", frame.frame_type(), e);
                }
                false
            }
        }
    }

    fn read(&self) -> Option<ServerMessage<T>> {
        if self.ended.load(Ordering::SeqCst) {
            return None;
        }

        let result = lock(&self.reader).read_frame();
        match result {
            Ok(frame) => self.classify(frame),
            Err(e) => {
                if self.cancelled.load(Ordering::SeqCst) {
                    debug!("🛑 Read interrupted by cancellation");
                } else if e.is_disconnect() {
                    info!("🔌 Connection closed by server");
                } else {
                    error!("❌ Failed to read frame: {}", e);
                    self.end_with(Some(Status::internal(format!("read failed: {}", e))));
                }
                self.ended.store(true, Ordering::SeqCst);
                None
            }
        }
    }

    fn half_close_writes(&self) -> bool {
        let writer = lock(&self.writer);
        match writer.get_ref().shutdown(Shutdown::Write) {
            Ok(()) => {
                debug!("📤 Half-closed write side");
                true
            }
            Err(e) => {
                debug!("⚠️ Half-close failed: {}", e);
                false
            }
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("🛑 Cancelling stream to {}", self.server_address);
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            debug!("⚠️ Socket shutdown during cancel failed: {}", e);
        }
    }

    fn finish(&self) -> Status {
        if !self.ended.load(Ordering::SeqCst) && !self.cancelled.load(Ordering::SeqCst) {
            self.await_trailer();
        }

        let trailer = lock(&self.trailer).take();
        let _ = self.socket.shutdown(Shutdown::Both);

        match trailer {
            Some(status) => status,
            None if self.cancelled.load(Ordering::SeqCst) => {
                Status::cancelled("stream cancelled by client")
            }
            None => Status::unavailable("connection closed without a status"),
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
