use crate::channel::ChannelError;
use crate::config::EventUpdateReceiverOptions;
use crate::error::Result;
use crate::handshake::SetupHandshake;
use crate::session::StreamSession;
use crate::state::{SessionState, SessionStats};
use log::info;
use std::sync::Arc;
use std::time::Duration;
use streams_protocol::{EventUpdate, RawStream, Status, TcpRawStream};

/// Follows the event lifecycle updates of a stream.
pub struct EventUpdateReceiver {
    session: StreamSession<EventUpdate>,
}

impl EventUpdateReceiver {
    pub fn connect(options: EventUpdateReceiverOptions) -> Result<Self> {
        let handshake = SetupHandshake::for_event_updates(&options)?;
        let stream = TcpRawStream::<EventUpdate>::connect_timeout(
            &options.target_address,
            options.connect_timeout,
        )?;
        Self::start(options, Arc::new(stream), handshake)
    }

    pub fn with_stream(
        options: EventUpdateReceiverOptions,
        stream: Arc<dyn RawStream<EventUpdate>>,
    ) -> Result<Self> {
        let handshake = SetupHandshake::for_event_updates(&options)?;
        Self::start(options, stream, handshake)
    }

    fn start(
        options: EventUpdateReceiverOptions,
        stream: Arc<dyn RawStream<EventUpdate>>,
        handshake: SetupHandshake,
    ) -> Result<Self> {
        let label = format!("{}/{}", options.channel.stream_id, options.receiver_id);
        info!("🗂️ Opening event update receiver {}", label);
        let session = StreamSession::open(label, stream, handshake, &options.advanced)?;
        Ok(Self { session })
    }

    pub fn receive(&self, timeout: Duration) -> std::result::Result<EventUpdate, ChannelError> {
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
