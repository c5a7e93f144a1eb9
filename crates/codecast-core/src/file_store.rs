//! File-backed event store.
//!
//! Every write is appended to a JSONL journal before it is applied to the
//! in-memory tree, and the journal is replayed on open. Each line holds one
//! [`JournalRecord`]:
//!
//! ```text
//! {"ts":1718000000000,"path":"/sessions/s1/code/250","value":{"code":"x","history":""}}
//! ```

use crate::memory_store::MemoryStore;
use async_trait::async_trait;
use codecast_proto::{EventStore, StoreEntry, StoreError, StorePath, ValueStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One line in the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Unix timestamp in milliseconds when the write was journaled.
    pub ts: i64,

    /// Store path in `/a/b` form.
    pub path: String,

    /// Written value; `null` deletes.
    pub value: Value,
}

/// Event store persisted to an append-only JSONL journal.
pub struct FileStore {
    path: PathBuf,
    memory: MemoryStore,
    journal: Mutex<File>,
    replayed: usize,
    malformed: usize,
}

impl FileStore {
    /// Opens (or creates) the journal at `path` and replays it.
    ///
    /// Lines that fail to parse are logged and skipped.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let memory = MemoryStore::new();
        let (mut replayed, mut malformed) = (0, 0);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for (idx, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JournalRecord>(line) {
                        Ok(record) => {
                            memory.apply(&StorePath::parse(&record.path), record.value)?;
                            replayed += 1;
                        }
                        Err(e) => {
                            warn!(error = %e, line_number = idx + 1, "Malformed journal line");
                            malformed += 1;
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(path = %path.display(), replayed, malformed, "Opened file store");
        Ok(Self {
            path,
            memory,
            journal: Mutex::new(journal),
            replayed,
            malformed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of journal records applied on open.
    pub fn replayed(&self) -> usize {
        self.replayed
    }

    /// Number of journal lines skipped on open.
    pub fn malformed(&self) -> usize {
        self.malformed
    }
}

#[async_trait]
impl EventStore for FileStore {
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        let record = JournalRecord {
            ts: chrono::Utc::now().timestamp_millis(),
            path: path.to_string(),
            value,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        // The journal lock also orders the in-memory applies.
        let mut journal = self.journal.lock().await;
        journal.write_all(line.as_bytes()).await?;
        journal.flush().await?;
        self.memory.apply(path, record.value)?;
        debug!(%path, "Journaled store write");
        Ok(())
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        self.memory.get(path).await
    }

    async fn children(&self, path: &StorePath) -> Result<Vec<StoreEntry>, StoreError> {
        self.memory.children(path).await
    }

    fn subscribe(&self, path: &StorePath) -> ValueStream {
        self.memory.subscribe(path)
    }
}
