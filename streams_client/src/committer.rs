//! Write side of a session: forwards caller commits to the stream.

use crate::channel::{BoundedChannel, ChannelError};
use crate::state::SessionShared;
use crate::stream_handle::StreamHandle;
use crate::task::CancellationToken;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use streams_protocol::{ClientMessage, CommitRequest, Status};

pub(crate) struct OffsetCommitter<T> {
    stream: Arc<StreamHandle<T>>,
    commits: Arc<BoundedChannel<i64>>,
    shared: Arc<SessionShared>,
    poll_interval: Duration,
}

impl<T> OffsetCommitter<T> {
    pub fn new(
        stream: Arc<StreamHandle<T>>,
        commits: Arc<BoundedChannel<i64>>,
        shared: Arc<SessionShared>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            stream,
            commits,
            shared,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Forward commits until the caller closes the commit channel, a write
    /// fails or `token` is cancelled.
    ///
    /// A refused write is not an error here: the stream is already broken and
    /// the response side will surface the reason.
    pub fn run(self, token: CancellationToken) -> Status {
        info!("📤 [{}] Offset committer started", self.shared.label());

        loop {
            if token.is_cancelled() {
                self.shared.close_write_half();
                self.commits.close();
                return Status::cancelled("offset committer cancelled");
            }

            match self.commits.read(self.poll_interval) {
                Ok(offset) => {
                    if !self.stream.write(&ClientMessage::Commit(CommitRequest { offset })) {
                        warn!(
                            "⚠️ [{}] Commit of offset {} was not written; stream is closing",
                            self.shared.label(),
                            offset
                        );
                        self.shared.close_write_half();
                        self.commits.close();
                        return Status::ok();
                    }
                    self.shared.record_commit(offset);
                    debug!("📤 Committed offset {}", offset);
                }
                Err(ChannelError::Timeout) => {}
                Err(ChannelError::Closed) => {
                    if token.is_cancelled() {
                        self.shared.close_write_half();
                        return Status::cancelled("offset committer cancelled");
                    }
                    if !self.stream.half_close_writes() {
                        warn!(
                            "⚠️ [{}] Half-close of the write side was refused",
                            self.shared.label()
                        );
                    }
                    self.shared.close_write_half();
                    info!("📪 [{}] Commits done; write half closed", self.shared.label());
                    return Status::ok();
                }
            }
        }
    }
}
