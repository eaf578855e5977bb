use crate::channel::ChannelError;
use crate::config::PacketReceiverOptions;
use crate::error::Result;
use crate::handshake::SetupHandshake;
use crate::session::StreamSession;
use crate::state::{SessionState, SessionStats};
use log::info;
use std::sync::Arc;
use std::time::Duration;
use streams_protocol::{Packet, RawStream, Status, TcpRawStream};

/// Reads the packets of one event and commits read progress.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use streams_client::{ChannelError, ChannelIdentity, PacketReceiver, PacketReceiverOptions};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let options = PacketReceiverOptions::new(
///     "127.0.0.1:50061",
///     ChannelIdentity::event("cluster-a", "camera-1", "event-1"),
///     "archiver",
/// );
/// let receiver = PacketReceiver::connect(options)?;
///
/// loop {
///     match receiver.receive(Duration::from_secs(1)) {
///         Ok(packet) => {
///             receiver.commit(packet.offset(), Duration::from_secs(1))?;
///         }
///         Err(ChannelError::Timeout) => continue,
///         Err(ChannelError::Closed) => break,
///     }
/// }
/// receiver.commits_done();
/// println!("finished with {}", receiver.finish());
/// # Ok(())
/// # }
/// ```
pub struct PacketReceiver {
    session: StreamSession<Packet>,
}

impl PacketReceiver {
    /// Connect over TCP and perform the setup handshake.
    pub fn connect(options: PacketReceiverOptions) -> Result<Self> {
        let handshake = SetupHandshake::for_packets(&options)?;
        let stream = TcpRawStream::<Packet>::connect_timeout(
            &options.target_address,
            options.connect_timeout,
        )?;
        Self::start(options, Arc::new(stream), handshake)
    }

    /// Run a session over an already established transport.
    pub fn with_stream(
        options: PacketReceiverOptions,
        stream: Arc<dyn RawStream<Packet>>,
    ) -> Result<Self> {
        let handshake = SetupHandshake::for_packets(&options)?;
        Self::start(options, stream, handshake)
    }

    fn start(
        options: PacketReceiverOptions,
        stream: Arc<dyn RawStream<Packet>>,
        handshake: SetupHandshake,
    ) -> Result<Self> {
        let label = format!(
            "{}/{}/{}",
            options.channel.stream_id, options.channel.event_id, options.receiver_id
        );
        info!(
            "📦 Opening packet receiver {} ({:?} mode)",
            label, options.receive_mode
        );
        let session = StreamSession::open(label, stream, handshake, &options.advanced)?;
        Ok(Self { session })
    }

    pub fn receive(&self, timeout: Duration) -> std::result::Result<Packet, ChannelError> {
        self.session.receive(timeout)
    }

    pub fn commit(&self, offset: i64, timeout: Duration) -> std::result::Result<(), ChannelError> {
        self.session.commit(offset, timeout)
    }

    pub fn commits_done(&self) {
        self.session.commits_done()
    }

    pub fn cancel(&self) {
        self.session.cancel()
    }

    pub fn finish(&self) -> Status {
        self.session.finish()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }
}
