//! Scriptable in-memory stream for driving sessions from tests.

#![allow(dead_code)]

use crossbeam_channel::{select, unbounded, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streams_client::{AdvancedOptions, ChannelIdentity, PacketReceiverOptions};
use streams_protocol::{
    ClientMessage, ControlSignal, Packet, PacketType, RawStream, ServerMessage, Status, StatusCode,
};

pub const SECOND: Duration = Duration::from_secs(1);
pub const SHORT: Duration = Duration::from_millis(50);

/// What the fake server pushes to the client
pub enum Inbound<T> {
    Message(ServerMessage<T>),
    End(Status),
}

/// What the client wrote
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ClientMessage),
    HalfClose,
}

pub struct FakeStream<T> {
    inbound_rx: Receiver<Inbound<T>>,
    outbound_tx: Sender<Outbound>,
    end_status: Mutex<Option<Status>>,
    writable: AtomicBool,
    panic_on_commit: AtomicBool,
    write_closed: AtomicBool,
    cancelled: AtomicBool,
    cancel_count: AtomicUsize,
    finish_count: AtomicUsize,
    cancel_tx: Mutex<Option<Sender<()>>>,
    cancel_rx: Receiver<()>,
}

impl<T> FakeStream<T> {
    fn end_with(&self, status: Status) {
        let mut end = self.end_status.lock().unwrap();
        if end.is_none() {
            *end = Some(status);
        }
    }

    fn has_ended(&self) -> bool {
        self.end_status.lock().unwrap().is_some()
    }
}

impl<T: Send> RawStream<T> for FakeStream<T> {
    fn write(&self, message: &ClientMessage) -> bool {
        if self.cancelled.load(Ordering::SeqCst)
            || self.write_closed.load(Ordering::SeqCst)
            || !self.writable.load(Ordering::SeqCst)
        {
            return false;
        }
        if matches!(message, ClientMessage::Commit(_)) && self.panic_on_commit.load(Ordering::SeqCst) {
            panic!("transport blew up writing a commit");
        }
        self.outbound_tx
            .send(Outbound::Message(message.clone()))
            .is_ok()
    }

    fn read(&self) -> Option<ServerMessage<T>> {
        if self.cancelled.load(Ordering::SeqCst) || self.has_ended() {
            return None;
        }
        select! {
            recv(self.inbound_rx) -> inbound => match inbound {
                Ok(Inbound::Message(message)) => Some(message),
                Ok(Inbound::End(status)) => {
                    self.end_with(status);
                    None
                }
                Err(_) => {
                    self.end_with(Status::unavailable("fake server went away"));
                    None
                }
            },
            recv(self.cancel_rx) -> _ => None,
        }
    }

    fn half_close_writes(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) || self.write_closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.outbound_tx.send(Outbound::HalfClose);
        true
    }

    fn cancel(&self) {
        self.cancel_count.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_tx.lock().unwrap().take();
    }

    fn finish(&self) -> Status {
        self.finish_count.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.end_status.lock().unwrap().clone() {
            return status;
        }
        // Nobody read the end of the stream; look for it in what is queued
        loop {
            match self.inbound_rx.try_recv() {
                Ok(Inbound::End(status)) => {
                    self.end_with(status.clone());
                    return status;
                }
                Ok(Inbound::Message(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if self.cancelled.load(Ordering::SeqCst) {
            Status::cancelled("cancelled by client")
        } else {
            Status::new(StatusCode::Unknown, "finished without a status")
        }
    }
}

/// The server end of a [`FakeStream`].
pub struct FakeServer<T> {
    inbound_tx: Sender<Inbound<T>>,
    outbound_rx: Receiver<Outbound>,
    stream: Arc<FakeStream<T>>,
}

impl<T: Send + 'static> FakeServer<T> {
    pub fn new() -> (Self, Arc<dyn RawStream<T>>) {
        let (inbound_tx, inbound_rx) = unbounded();
        let (outbound_tx, outbound_rx) = unbounded();
        let (cancel_tx, cancel_rx) = unbounded();

        let stream = Arc::new(FakeStream {
            inbound_rx,
            outbound_tx,
            end_status: Mutex::new(None),
            writable: AtomicBool::new(true),
            panic_on_commit: AtomicBool::new(false),
            write_closed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            cancel_count: AtomicUsize::new(0),
            finish_count: AtomicUsize::new(0),
            cancel_tx: Mutex::new(Some(cancel_tx)),
            cancel_rx,
        });

        let server = Self {
            inbound_tx,
            outbound_rx,
            stream: Arc::clone(&stream),
        };
        let raw: Arc<dyn RawStream<T>> = stream;
        (server, raw)
    }

    pub fn send_item(&self, item: T) {
        let _ = self
            .inbound_tx
            .send(Inbound::Message(ServerMessage::Data(item)));
    }

    pub fn heartbeat(&self) {
        let _ = self
            .inbound_tx
            .send(Inbound::Message(ServerMessage::Control(ControlSignal::Heartbeat)));
    }

    pub fn writes_done(&self) {
        let _ = self.inbound_tx.send(Inbound::Message(ServerMessage::Control(
            ControlSignal::WritesDoneRequest,
        )));
    }

    pub fn end(&self, status: Status) {
        let _ = self.inbound_tx.send(Inbound::End(status));
    }

    /// Make every client write fail, as a dead transport would
    pub fn reject_writes(&self) {
        self.stream.writable.store(false, Ordering::SeqCst);
    }

    /// Make the next commit write panic inside the client's committer
    pub fn panic_on_commit(&self) {
        self.stream.panic_on_commit.store(true, Ordering::SeqCst);
    }

    pub fn next_outbound(&self, timeout: Duration) -> Option<Outbound> {
        self.outbound_rx.recv_timeout(timeout).ok()
    }

    /// Collect commit offsets until the client half-closes.
    pub fn commits_until_half_close(&self, timeout: Duration) -> Vec<i64> {
        let mut commits = Vec::new();
        loop {
            match self.next_outbound(timeout) {
                Some(Outbound::Message(ClientMessage::Commit(commit))) => commits.push(commit.offset),
                Some(Outbound::HalfClose) => return commits,
                other => panic!("expected commit or half-close, got {:?}", other),
            }
        }
    }

    pub fn cancel_count(&self) -> usize {
        self.stream.cancel_count.load(Ordering::SeqCst)
    }

    pub fn finish_count(&self) -> usize {
        self.stream.finish_count.load(Ordering::SeqCst)
    }
}

/// Timings short enough for tests but far above scheduler noise
pub fn fast_options() -> AdvancedOptions {
    AdvancedOptions {
        heartbeat_interval: Duration::from_millis(200),
        heartbeat_grace_period: Duration::from_millis(200),
        writes_done_grace_period: Duration::from_millis(500),
        read_timeout: Duration::from_millis(20),
        commit_poll_interval: Duration::from_millis(20),
        shutdown_timeout: SECOND,
        ..AdvancedOptions::default()
    }
}

pub fn packet_options() -> PacketReceiverOptions {
    let mut options = PacketReceiverOptions::new(
        "fake:0",
        ChannelIdentity::event("cluster-a", "camera-1", "event-1"),
        "test-receiver",
    );
    options.advanced = fast_options();
    options
}

pub fn packet(offset: i64) -> Packet {
    Packet::new(
        PacketType::new("gst", "video/x-h264"),
        vec![offset as u8; 4],
        offset,
    )
}
