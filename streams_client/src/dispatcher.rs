//! Read side of a session: pulls messages off the stream, hands data items
//! to the caller and enforces heartbeat and writes-done liveness.

use crate::channel::{BoundedChannel, ChannelError};
use crate::config::AdvancedOptions;
use crate::state::SessionShared;
use crate::stream_handle::StreamHandle;
use crate::task::{CancellationToken, Task, TaskError};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use streams_protocol::{ControlSignal, ServerMessage, Status, StreamItem};

/// How the dispatch loop ended
enum Termination {
    /// The server closed the stream
    StreamEnded,
    /// The caller closed the data channel
    CallerClosed,
    /// Liveness failure or cancellation; the stream must be torn down
    Forced(Status),
}

pub(crate) struct ResponseDispatcher<T> {
    stream: Arc<StreamHandle<T>>,
    data: Arc<BoundedChannel<T>>,
    shared: Arc<SessionShared>,
    liveness_deadline: Duration,
    writes_done_grace_period: Duration,
    read_timeout: Duration,
    shutdown_timeout: Duration,
}

impl<T: StreamItem> ResponseDispatcher<T> {
    pub fn new(
        stream: Arc<StreamHandle<T>>,
        data: Arc<BoundedChannel<T>>,
        shared: Arc<SessionShared>,
        options: &AdvancedOptions,
    ) -> Self {
        Self {
            stream,
            data,
            shared,
            liveness_deadline: options.liveness_deadline(),
            writes_done_grace_period: options.writes_done_grace_period,
            read_timeout: options.read_timeout.max(Duration::from_millis(1)),
            shutdown_timeout: options.shutdown_timeout,
        }
    }

    /// Run until the stream ends, the caller stops reading, liveness fails
    /// or `token` is cancelled. Closes the data channel on every path.
    pub fn run(self, token: CancellationToken) -> Status {
        info!(
            "📥 [{}] Response dispatcher started (liveness deadline {:?})",
            self.shared.label(),
            self.liveness_deadline
        );

        // Single slot: the reader never runs more than one message ahead
        let inbox = Arc::new(BoundedChannel::new("inbox", 1));
        let reader = match self.start_reader(&inbox) {
            Ok(reader) => reader,
            Err(e) => {
                error!("❌ Failed to start stream reader: {}", e);
                self.shared.close_read_half();
                self.data.close();
                self.stream.cancel();
                return Status::internal(format!("failed to start stream reader: {}", e));
            }
        };

        let termination = self.dispatch(&inbox, &token);
        self.shared.close_read_half();
        self.data.close();

        let status = match termination {
            Termination::StreamEnded => {
                debug!("🔚 [{}] Stream ended; read half closed", self.shared.label());
                Status::ok()
            }
            Termination::CallerClosed => {
                info!(
                    "📭 [{}] Data channel closed by caller, stopping dispatch",
                    self.shared.label()
                );
                self.stop_reader(&reader, &inbox);
                Status::ok()
            }
            Termination::Forced(status) => {
                warn!("🛑 [{}] Tearing down stream: {}", self.shared.label(), status);
                self.stop_reader(&reader, &inbox);
                status
            }
        };

        self.reap_reader(reader);
        status
    }

    fn start_reader(
        &self,
        inbox: &Arc<BoundedChannel<ServerMessage<T>>>,
    ) -> std::io::Result<Task<()>> {
        let stream = Arc::clone(&self.stream);
        let inbox = Arc::clone(inbox);
        let poll = self.read_timeout;

        Task::start("stream-reader", move |token: CancellationToken| {
            while !token.is_cancelled() {
                let Some(message) = stream.read() else {
                    trace!("📖 Stream reader reached end of stream");
                    break;
                };
                if inbox.write_until_cancelled(message, &token, poll).is_err() {
                    break;
                }
            }
            inbox.close();
        })
    }

    /// The liveness countdown pauses while an item waits for room in the
    /// data channel, so a caller that stops reading also stops heartbeat
    /// enforcement.
    fn dispatch(
        &self,
        inbox: &BoundedChannel<ServerMessage<T>>,
        token: &CancellationToken,
    ) -> Termination {
        let mut remaining = self.liveness_deadline;
        let mut last_offset: Option<i64> = None;

        loop {
            if token.is_cancelled() {
                return Termination::Forced(Status::cancelled("response dispatcher cancelled"));
            }

            let waited_from = Instant::now();
            match inbox.read(remaining.min(self.read_timeout)) {
                Ok(ServerMessage::Data(item)) => {
                    remaining = self.liveness_deadline;
                    self.check_order(&mut last_offset, item.offset());
                    self.shared.record_item();
                    trace!("📥 Dispatching {} at offset {}", T::KIND, item.offset());

                    match self.data.write_until_cancelled(item, token, self.read_timeout) {
                        Ok(()) => {}
                        Err(_) if token.is_cancelled() => {
                            return Termination::Forced(Status::cancelled(
                                "response dispatcher cancelled",
                            ));
                        }
                        Err(_) => return Termination::CallerClosed,
                    }
                }
                Ok(ServerMessage::Control(ControlSignal::Heartbeat)) => {
                    remaining = self.liveness_deadline;
                    self.shared.record_heartbeat();
                    trace!("💓 Heartbeat");
                }
                Ok(ServerMessage::Control(ControlSignal::WritesDoneRequest)) => {
                    return self.await_stream_end(inbox, token);
                }
                Err(ChannelError::Timeout) => {
                    remaining = remaining.saturating_sub(waited_from.elapsed());
                    if remaining.is_zero() {
                        warn!(
                            "💔 [{}] Missed heartbeat: nothing from server for {:?}",
                            self.shared.label(),
                            self.liveness_deadline
                        );
                        return Termination::Forced(Status::cancelled(format!(
                            "missed heartbeat: no message from server within {:?}",
                            self.liveness_deadline
                        )));
                    }
                }
                Err(ChannelError::Closed) => return Termination::StreamEnded,
            }
        }
    }

    /// After a writes-done request no more data is delivered. Wait for the
    /// server to close the stream, but only for the writes-done grace period.
    fn await_stream_end(
        &self,
        inbox: &BoundedChannel<ServerMessage<T>>,
        token: &CancellationToken,
    ) -> Termination {
        info!(
            "🏁 [{}] Server requested writes-done; closing read half",
            self.shared.label()
        );
        self.shared.close_read_half();
        self.data.close();

        let deadline = Instant::now() + self.writes_done_grace_period;
        loop {
            if token.is_cancelled() {
                return Termination::Forced(Status::cancelled("response dispatcher cancelled"));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    "⏰ [{}] Stream still open {:?} after writes-done request",
                    self.shared.label(),
                    self.writes_done_grace_period
                );
                return Termination::Forced(Status::cancelled(format!(
                    "writes-done grace period of {:?} elapsed before the stream closed",
                    self.writes_done_grace_period
                )));
            }

            match inbox.read(remaining.min(self.read_timeout)) {
                Ok(ServerMessage::Control(ControlSignal::Heartbeat)) => {
                    self.shared.record_heartbeat();
                }
                Ok(ServerMessage::Data(item)) => {
                    debug!(
                        "🗑️ Discarding {} at offset {} received after writes-done",
                        T::KIND,
                        item.offset()
                    );
                }
                Ok(ServerMessage::Control(ControlSignal::WritesDoneRequest)) => {
                    debug!("🔁 Duplicate writes-done request");
                }
                Err(ChannelError::Timeout) => {}
                Err(ChannelError::Closed) => return Termination::StreamEnded,
            }
        }
    }

    fn check_order(&self, last_offset: &mut Option<i64>, offset: i64) {
        if let Some(previous) = *last_offset {
            if offset < previous {
                warn!(
                    "⚠️ [{}] {} offset went backwards: {} after {}",
                    self.shared.label(),
                    T::KIND,
                    offset,
                    previous
                );
            }
        }
        *last_offset = Some(offset);
    }

    fn stop_reader(&self, reader: &Task<()>, inbox: &BoundedChannel<ServerMessage<T>>) {
        reader.cancel();
        inbox.close();
        self.stream.cancel();
    }

    fn reap_reader(&self, mut reader: Task<()>) {
        match reader.get_result(self.shutdown_timeout) {
            Ok(()) => trace!("📖 Stream reader stopped"),
            Err(TaskError::Pending(_)) => warn!(
                "⚠️ Stream reader did not stop within {:?}; detaching it",
                self.shutdown_timeout
            ),
            Err(e) => error!("❌ {}", e),
        }
    }
}
