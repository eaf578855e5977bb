//! Exercises `TcpRawStream` against a scripted loopback server.

use serial_test::serial;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use streams_protocol::{
    ClientMessage, CommitRequest, Connection, ControlSignal, Frame, Packet, PacketType,
    RawStream, ReceiveModeSetup, ReceivePacketsSetup, ServerMessage, SetupRequest, Status,
    StatusCode, TcpRawStream,
};

fn setup_request() -> SetupRequest {
    SetupRequest::Packets(ReceivePacketsSetup {
        cluster: "cluster-a".to_string(),
        stream: "camera-1".to_string(),
        event: "event-1".to_string(),
        receiver: "test-receiver".to_string(),
        mode: ReceiveModeSetup::Eager,
        heartbeat_interval_ms: 1_000,
        writes_done_grace_period_ms: 1_000,
    })
}

#[test]
#[serial]
fn test_full_session_over_loopback() {
    env_logger::try_init().ok();

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let address = listener.local_addr().unwrap().to_string();

    let server = thread::spawn(move || {
        let (socket, _) = listener.accept().expect("accept");
        let mut conn = Connection::new(socket).expect("connection");

        let setup = conn.read_frame().expect("setup frame");
        assert!(matches!(setup, Frame::Setup(_)));

        let packet = Packet::new(PacketType::new("gst", "video/x-h264"), vec![1, 2, 3], 7);
        conn.write_frame(&Frame::Packet(packet)).unwrap();
        conn.write_frame(&Frame::Heartbeat).unwrap();
        conn.write_frame(&Frame::WritesDoneRequest).unwrap();

        let commit = conn.read_frame().expect("commit frame");
        assert_eq!(commit, Frame::Commit(CommitRequest { offset: 7 }));

        // Client half-close shows up as EOF
        assert!(conn.read_frame().unwrap_err().is_disconnect());

        conn.write_frame(&Frame::Status(Status::out_of_range("end of range")))
            .unwrap();
    });

    let stream = TcpRawStream::<Packet>::connect(&address).expect("connect");
    assert!(stream.write(&ClientMessage::Setup(setup_request())));

    match stream.read() {
        Some(ServerMessage::Data(packet)) => {
            assert_eq!(packet.offset(), 7);
            assert_eq!(packet.payload, vec![1, 2, 3]);
        }
        other => panic!("expected packet, got {:?}", other),
    }
    assert_eq!(
        stream.read(),
        Some(ServerMessage::Control(ControlSignal::Heartbeat))
    );
    assert_eq!(
        stream.read(),
        Some(ServerMessage::Control(ControlSignal::WritesDoneRequest))
    );

    assert!(stream.write(&ClientMessage::Commit(CommitRequest { offset: 7 })));
    assert!(stream.half_close_writes());

    assert_eq!(stream.read(), None);
    let status = stream.finish();
    assert_eq!(status.code(), StatusCode::OutOfRange);
    assert_eq!(status.message(), "end of range");

    server.join().expect("server thread");
}

#[test]
#[serial]
fn test_cancel_unblocks_pending_read() {
    env_logger::try_init().ok();

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let address = listener.local_addr().unwrap().to_string();

    // Server accepts and then stays silent
    let server = thread::spawn(move || {
        let (socket, _) = listener.accept().expect("accept");
        thread::sleep(Duration::from_millis(800));
        drop(socket);
    });

    let stream = Arc::new(TcpRawStream::<Packet>::connect(&address).expect("connect"));
    let reader = {
        let stream = Arc::clone(&stream);
        thread::spawn(move || stream.read())
    };

    thread::sleep(Duration::from_millis(100));
    let started = Instant::now();
    stream.cancel();

    assert_eq!(reader.join().expect("reader thread"), None);
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(!stream.write(&ClientMessage::Commit(CommitRequest { offset: 1 })));
    assert!(stream.finish().is_cancelled());

    server.join().expect("server thread");
}

#[test]
#[serial]
fn test_missing_trailer_reports_unavailable() {
    env_logger::try_init().ok();

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let address = listener.local_addr().unwrap().to_string();

    let server = thread::spawn(move || {
        let (socket, _) = listener.accept().expect("accept");
        let mut conn = Connection::new(socket).expect("connection");
        let _ = conn.read_frame();
        // Hang up without a status frame
    });

    let stream = TcpRawStream::<Packet>::connect(&address).expect("connect");
    assert!(stream.write(&ClientMessage::Setup(setup_request())));
    assert_eq!(stream.read(), None);

    let status = stream.finish();
    assert_eq!(status.code(), StatusCode::Unavailable);

    server.join().expect("server thread");
}
