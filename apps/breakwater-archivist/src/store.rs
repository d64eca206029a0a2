use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use breakwater_archive::ThreadRecord;

/// On-disk layout: one directory per board, one text file per thread named by
/// its compact article ID. A designated placeholder character marks a line
/// never captured; merges are monotonic, so real content never regresses.
#[derive(Clone)]
pub struct ArchiveStore {
    root: PathBuf,
    // serializes read-merge-write cycles; one archivist, low traffic
    write_lock: Arc<Mutex<()>>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record carries no board or key")]
    Unaddressed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn thread_path(&self, board: &str, key: &str) -> PathBuf {
        self.root.join(board).join(key)
    }

    /// Merge one incoming record into the archive file for its thread.
    pub async fn merge(&self, incoming: ThreadRecord) -> Result<(), StoreError> {
        if incoming.board.is_empty() || incoming.key.is_empty() {
            return Err(StoreError::Unaddressed);
        }
        let _guard = self.write_lock.lock().await;

        let dir = self.root.join(&incoming.board);
        tokio::fs::create_dir_all(&dir).await?;
        let path = self.thread_path(&incoming.board, &incoming.key);

        let mut accumulated = match load_record(&path, &incoming).await? {
            Some(existing) => existing,
            None => {
                info!(board = %incoming.board, key = %incoming.key, "new thread archived");
                ThreadRecord {
                    board: incoming.board.clone(),
                    key: incoming.key.clone(),
                    ..ThreadRecord::default()
                }
            }
        };
        accumulated.merge(&incoming);

        tokio::fs::write(&path, accumulated.to_file_text()).await?;
        debug!(
            board = %incoming.board,
            key = %incoming.key,
            lines = accumulated.lines.len(),
            "merged"
        );
        Ok(())
    }

    pub async fn boards(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn threads(&self, board: &str) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.root.join(board)).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

async fn load_record(path: &Path, incoming: &ThreadRecord) -> Result<Option<ThreadRecord>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(ThreadRecord {
            board: incoming.board.clone(),
            key: incoming.key.clone(),
            lines: ThreadRecord::lines_from_file_text(&text),
            ..ThreadRecord::default()
        })),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
