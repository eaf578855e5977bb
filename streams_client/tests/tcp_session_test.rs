//! Packet receiver sessions against a mock TCP stream server.

use serial_test::serial;
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};
use streams_client::{
    AdvancedOptions, ChannelError, ChannelIdentity, ClientError, PacketReceiver,
    PacketReceiverOptions, ReceiveMode,
};
use streams_protocol::{
    CommitRequest, Connection, Frame, Packet, PacketType, ReceiveModeSetup, SetupRequest, Status,
    StatusCode,
};

fn options(address: String) -> PacketReceiverOptions {
    let mut options = PacketReceiverOptions::new(
        address,
        ChannelIdentity::event("cluster-a", "camera-1", "event-1"),
        "tcp-receiver",
    );
    options.receive_mode = ReceiveMode::Controlled;
    options.connect_timeout = Duration::from_secs(2);
    options.advanced = AdvancedOptions {
        heartbeat_interval: Duration::from_millis(200),
        heartbeat_grace_period: Duration::from_millis(200),
        writes_done_grace_period: Duration::from_secs(1),
        read_timeout: Duration::from_millis(20),
        commit_poll_interval: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(1),
        ..AdvancedOptions::default()
    };
    options
}

fn packet(offset: i64) -> Packet {
    Packet::new(PacketType::new("gst", "video/x-h264"), vec![0xAB; 16], offset)
}

#[test]
#[serial]
fn test_packet_session_over_tcp() -> anyhow::Result<()> {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let address = listener.local_addr()?.to_string();

    let server = thread::spawn(move || -> anyhow::Result<Vec<i64>> {
        let (socket, _) = listener.accept()?;
        let mut conn = Connection::new(socket)?;

        match conn.read_frame()? {
            Frame::Setup(SetupRequest::Packets(setup)) => {
                assert_eq!(setup.receiver, "tcp-receiver");
                assert!(matches!(setup.mode, ReceiveModeSetup::Controlled { .. }));
                assert_eq!(setup.heartbeat_interval_ms, 200);
            }
            other => panic!("expected packet setup, got {:?}", other),
        }

        for offset in 10..13 {
            conn.write_frame(&Frame::Packet(packet(offset)))?;
            conn.write_frame(&Frame::Heartbeat)?;
        }
        conn.write_frame(&Frame::WritesDoneRequest)?;

        let mut commits = Vec::new();
        loop {
            match conn.read_frame() {
                Ok(Frame::Commit(CommitRequest { offset })) => commits.push(offset),
                Ok(other) => panic!("unexpected frame {:?}", other),
                Err(e) if e.is_disconnect() => break,
                Err(e) => return Err(e.into()),
            }
        }

        conn.write_frame(&Frame::Status(Status::out_of_range("end of range")))?;
        Ok(commits)
    });

    let receiver = PacketReceiver::connect(options(address))?;

    let mut offsets = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        assert!(Instant::now() < deadline, "read half never closed");
        match receiver.receive(Duration::from_millis(50)) {
            Ok(packet) => {
                assert_eq!(packet.payload.len(), 16);
                offsets.push(packet.offset());
            }
            Err(ChannelError::Timeout) => continue,
            Err(ChannelError::Closed) => break,
        }
    }
    assert_eq!(offsets, vec![10, 11, 12]);

    receiver.commit(12, Duration::from_secs(1))?;
    receiver.commits_done();
    let status = receiver.finish();

    let commits = server.join().expect("server thread")?;
    assert_eq!(status.code(), StatusCode::OutOfRange);
    assert_eq!(commits, vec![12]);
    Ok(())
}

#[test]
#[serial]
fn test_silent_tcp_server_is_cancelled() -> anyhow::Result<()> {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let address = listener.local_addr()?.to_string();

    let server = thread::spawn(move || -> anyhow::Result<()> {
        let (socket, _) = listener.accept()?;
        let mut conn = Connection::new(socket)?;
        conn.read_frame()?;
        conn.write_frame(&Frame::Packet(packet(0)))?;

        // Say nothing more; the client gives up and hangs up
        while conn.read_frame().is_ok() {}
        Ok(())
    });

    let receiver = PacketReceiver::connect(options(address))?;
    assert_eq!(receiver.receive(Duration::from_secs(1))?.offset(), 0);

    let started = Instant::now();
    assert_eq!(
        receiver.receive(Duration::from_secs(3)).unwrap_err(),
        ChannelError::Closed
    );
    assert!(started.elapsed() < Duration::from_secs(2));

    receiver.commits_done();
    let status = receiver.finish();
    assert_eq!(status.code(), StatusCode::Cancelled);
    assert!(status.message().contains("heartbeat"), "{}", status);

    server.join().expect("server thread")?;
    Ok(())
}

#[test]
#[serial]
fn test_unreachable_server_is_a_connect_error() {
    let _ = env_logger::try_init();

    // Bind then drop to find a port nobody listens on
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().unwrap().to_string()
    };

    match PacketReceiver::connect(options(address)) {
        Err(ClientError::Connect(_)) => {}
        Err(other) => panic!("expected connect error, got {:?}", other),
        Ok(_) => panic!("connected to a closed port"),
    }
}
