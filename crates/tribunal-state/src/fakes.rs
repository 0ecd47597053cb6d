//! In-memory fake for the checkpoint store (testing only)

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory checkpoint store backed by `session → seq → record`.
///
/// `fail_writes_after` lets tests simulate a crash or a full disk after a
/// given number of successful writes.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    sessions: Mutex<HashMap<String, BTreeMap<u64, CheckpointRecord>>>,
    fail_writes_after: Mutex<Option<usize>>,
    writes: Mutex<usize>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write after the first `n` fail with an io error.
    pub fn fail_writes_after(&self, n: usize) {
        *self.fail_writes_after.lock().unwrap() = Some(n);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn write(&self, key: &CheckpointKey, document: &serde_json::Value) -> StorageResult<()> {
        validate_session_id(&key.session_id)?;
        let mut writes = self.writes.lock().unwrap();
        if let Some(limit) = *self.fail_writes_after.lock().unwrap() {
            if *writes >= limit {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "simulated checkpoint write failure",
                )));
            }
        }
        let record = CheckpointRecord {
            key: key.clone(),
            document: document.clone(),
            written_at: Utc::now(),
        };
        self.sessions
            .lock()
            .unwrap()
            .entry(key.session_id.clone())
            .or_default()
            .insert(key.seq, record);
        *writes += 1;
        Ok(())
    }

    async fn load(&self, key: &CheckpointKey) -> StorageResult<CheckpointRecord> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .get(&key.session_id)
            .and_then(|records| records.get(&key.seq))
            .filter(|record| record.key == *key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn latest(&self, session_id: &str) -> StorageResult<Option<CheckpointRecord>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(session_id)
            .and_then(|records| records.values().next_back())
            .cloned())
    }

    async fn list(&self, session_id: &str) -> StorageResult<Vec<CheckpointKey>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(session_id)
            .map(|records| records.values().map(|r| r.key.clone()).collect())
            .unwrap_or_default())
    }

    async fn sessions(&self) -> StorageResult<Vec<String>> {
        let mut ids: Vec<String> = self.sessions.lock().unwrap().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
