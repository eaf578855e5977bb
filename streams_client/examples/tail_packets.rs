//! Follow the packets of one event and commit progress as they arrive.
//!
//! Timings come from `STREAMS_*` environment variables (or a `.env` file).
//!
//! ```bash
//! cd streams_client && cargo run --example tail_packets -- 127.0.0.1:50061 cluster-a camera-1 event-1
//! ```

use log::{info, warn};
use std::time::Duration;
use streams_client::{
    AdvancedOptions, ChannelError, ChannelIdentity, PacketReceiver, PacketReceiverOptions,
    StatusCode,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [address, cluster, stream, event] = args.as_slice() else {
        return Err("usage: tail_packets <address> <cluster> <stream> <event>".into());
    };

    let mut options = PacketReceiverOptions::new(
        address.as_str(),
        ChannelIdentity::event(cluster.as_str(), stream.as_str(), event.as_str()),
        "tail-packets",
    );
    options.advanced = AdvancedOptions::from_env()?;

    info!("🚀 Tailing {}/{}/{} at {}", cluster, stream, event, address);
    let receiver = PacketReceiver::connect(options)?;

    loop {
        match receiver.receive(Duration::from_secs(1)) {
            Ok(packet) => {
                println!(
                    "📦 offset {} type {}/{} ({} bytes)",
                    packet.offset(),
                    packet.header.packet_type.type_class,
                    packet.header.packet_type.type_name,
                    packet.payload.len()
                );
                if receiver.commit(packet.offset(), Duration::from_secs(1)).is_err() {
                    warn!("⚠️ Write half closed; no further commits");
                }
            }
            Err(ChannelError::Timeout) => continue,
            Err(ChannelError::Closed) => break,
        }
    }

    receiver.commits_done();
    let status = receiver.finish();
    match status.code() {
        StatusCode::Ok | StatusCode::OutOfRange => info!("🏁 Stream complete: {}", status),
        _ => return Err(status.into()),
    }

    let stats = receiver.stats();
    info!(
        "📊 {} packets, {} heartbeats, {} commits",
        stats.items_received, stats.heartbeats_received, stats.commits_written
    );
    Ok(())
}
