//! Client side of the archivist IPC: lazy connection, fire-and-forget
//! records, deferred retry. Archival trouble never fails a session.

use std::collections::VecDeque;
use std::path::PathBuf;

use tokio::net::UnixStream;
use tracing::{debug, warn};

use breakwater_archive::{encode_thread_record, write_frame, ThreadRecord, FRAME_TYPE_THREAD};

/// Records kept for a later attempt when the archivist is unreachable.
const PENDING_CAP: usize = 64;

pub struct ArchiveClient {
    path: PathBuf,
    stream: Option<UnixStream>,
    pending: VecDeque<ThreadRecord>,
}

impl ArchiveClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stream: None,
            pending: VecDeque::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn ensure_connected(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        match UnixStream::connect(&self.path).await {
            Ok(stream) => {
                debug!(target: "breakwater::archive", path = %self.path.display(), "connected");
                self.stream = Some(stream);
                true
            }
            Err(err) => {
                debug!(target: "breakwater::archive", %err, "archivist unavailable; deferring");
                false
            }
        }
    }

    /// Ship one record, flushing anything deferred first. Failures park the
    /// record for the next attempt.
    pub async fn send_thread(&mut self, record: ThreadRecord) {
        self.pending.push_back(record);
        while self.pending.len() > PENDING_CAP {
            self.pending.pop_front();
            warn!(target: "breakwater::archive", "pending archive queue overflow; oldest dropped");
        }

        if !self.ensure_connected().await {
            return;
        }

        while let Some(record) = self.pending.front() {
            let payload = encode_thread_record(record);
            let Some(stream) = self.stream.as_mut() else {
                return;
            };
            match write_frame(stream, FRAME_TYPE_THREAD, &payload).await {
                Ok(()) => {
                    debug!(
                        target: "breakwater::archive",
                        board = %record.board,
                        key = %record.key,
                        lines = record.lines.len(),
                        "record sent"
                    );
                    self.pending.pop_front();
                }
                Err(err) => {
                    warn!(target: "breakwater::archive", %err, "send failed; will retry lazily");
                    self.stream = None;
                    return;
                }
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
