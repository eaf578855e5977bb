use crate::config::{
    AdvancedOptions, EventUpdateReceiverOptions, OffsetPolicy, PacketReceiverOptions, ReceiveMode,
};
use crate::error::{ClientError, Result};
use crate::stream_handle::StreamHandle;
use log::{debug, error, info};
use std::time::Duration;
use streams_protocol::{
    ClientMessage, ReceiveEventsSetup, ReceiveModeSetup, ReceivePacketsSetup, SetupRequest, Status,
    StatusCode,
};

/// The validated setup message that opens a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupHandshake {
    request: SetupRequest,
}

impl SetupHandshake {
    pub fn for_packets(options: &PacketReceiverOptions) -> Result<Self> {
        require("target address", &options.target_address)?;
        require("cluster name", &options.channel.cluster_name)?;
        require("stream id", &options.channel.stream_id)?;
        require("receiver id", &options.receiver_id)?;

        let advanced = &options.advanced;
        let mode = match options.receive_mode {
            ReceiveMode::Eager => ReceiveModeSetup::Eager,
            ReceiveMode::Controlled => ReceiveModeSetup::Controlled {
                starting_offset: policy("starting offset", &advanced.starting_offset)?,
                fallback_offset: policy("fallback offset", &advanced.fallback_offset)?,
                lease_term_ms: millis(advanced.lease_term),
            },
        };

        Ok(Self {
            request: SetupRequest::Packets(ReceivePacketsSetup {
                cluster: options.channel.cluster_name.clone(),
                stream: options.channel.stream_id.clone(),
                event: options.channel.event_id.clone(),
                receiver: options.receiver_id.clone(),
                mode,
                heartbeat_interval_ms: millis(advanced.heartbeat_interval),
                writes_done_grace_period_ms: millis(advanced.writes_done_grace_period),
            }),
        })
    }

    pub fn for_event_updates(options: &EventUpdateReceiverOptions) -> Result<Self> {
        require("target address", &options.target_address)?;
        require("cluster name", &options.channel.cluster_name)?;
        require("stream id", &options.channel.stream_id)?;
        require("receiver id", &options.receiver_id)?;

        let advanced: &AdvancedOptions = &options.advanced;
        Ok(Self {
            request: SetupRequest::EventUpdates(ReceiveEventsSetup {
                cluster: options.channel.cluster_name.clone(),
                stream: options.channel.stream_id.clone(),
                receiver: options.receiver_id.clone(),
                starting_offset: policy("starting offset", &advanced.starting_offset)?,
                fallback_offset: policy("fallback offset", &advanced.fallback_offset)?,
                heartbeat_interval_ms: millis(advanced.heartbeat_interval),
                writes_done_grace_period_ms: millis(advanced.writes_done_grace_period),
            }),
        })
    }

    pub fn request(&self) -> &SetupRequest {
        &self.request
    }

    /// Send the setup message as the stream's first write.
    ///
    /// If the write is refused the stream is half-closed and finished, and
    /// the server's status comes back in [`ClientError::Handshake`].
    pub(crate) fn perform<T>(self, stream: &StreamHandle<T>) -> Result<()> {
        debug!("🤝 Sending setup request: {:?}", self.request);
        if stream.write(&ClientMessage::Setup(self.request)) {
            info!("🤝 Setup request accepted by transport");
            return Ok(());
        }

        stream.half_close_writes();
        let status = stream.finish();
        error!("❌ Setup handshake rejected: {}", status);

        let status = if status.is_ok() {
            Status::new(
                StatusCode::Unavailable,
                "stream closed during setup without an error status",
            )
        } else {
            status
        };
        Err(ClientError::Handshake(status))
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ClientError::Config(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn policy(field: &str, value: &str) -> Result<String> {
    let parsed: OffsetPolicy = value
        .parse()
        .map_err(|e| ClientError::Config(format!("{}: {}", field, e)))?;
    Ok(parsed.to_string())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
