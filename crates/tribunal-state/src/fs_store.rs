//! Filesystem checkpoint store.
//!
//! Layout: `<root>/<session_id>/<seq:05>-i<iteration:02>-<phase>.json`, one
//! pretty-printed [`CheckpointRecord`] per file. Writes go to a temp file in
//! the session directory and are renamed into place, so a crash mid-write
//! never leaves a truncated checkpoint behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{
    validate_session_id, CheckpointKey, CheckpointRecord, CheckpointStore, StorageResult,
};

pub struct FsCheckpointStore {
    root: PathBuf,
}

impl FsCheckpointStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> StorageResult<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.root.join(session_id))
    }

    fn read_record(path: &Path, key: &CheckpointKey) -> StorageResult<CheckpointRecord> {
        let bytes = fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn write(&self, key: &CheckpointKey, document: &serde_json::Value) -> StorageResult<()> {
        let dir = self.session_dir(&key.session_id)?;
        fs::create_dir_all(&dir)?;

        let record = CheckpointRecord {
            key: key.clone(),
            document: document.clone(),
            written_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&record)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        let path = dir.join(key.file_name());
        tmp.persist(&path).map_err(|e| e.error)?;

        debug!(checkpoint = %key, path = %path.display(), "checkpoint persisted");
        Ok(())
    }

    async fn load(&self, key: &CheckpointKey) -> StorageResult<CheckpointRecord> {
        let path = self.session_dir(&key.session_id)?.join(key.file_name());
        Self::read_record(&path, key)
    }

    async fn latest(&self, session_id: &str) -> StorageResult<Option<CheckpointRecord>> {
        match self.list(session_id).await?.pop() {
            Some(key) => self.load(&key).await.map(Some),
            None => Ok(None),
        }
    }

    async fn list(&self, session_id: &str) -> StorageResult<Vec<CheckpointKey>> {
        let dir = self.session_dir(session_id)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // Temp files from in-progress writes are not checkpoints.
            if !name.ends_with(".json") {
                continue;
            }
            keys.push(CheckpointKey::from_file_name(session_id, name)?);
        }
        keys.sort();
        Ok(keys)
    }

    async fn sessions(&self) -> StorageResult<Vec<String>> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    sessions.push(name.to_string());
                }
            }
        }
        sessions.sort();
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_store() -> (tempfile::TempDir, FsCheckpointStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path().join("checkpoints")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn write_creates_one_file_per_key() {
        let (_dir, store) = make_store();
        let k1 = CheckpointKey::new("s1", 1, 1, "planning");
        let k2 = CheckpointKey::new("s1", 2, 1, "synthesizing");
        store.write(&k1, &json!({"phase": "planning"})).await.unwrap();
        store.write(&k2, &json!({"phase": "synthesizing"})).await.unwrap();

        let files: Vec<_> = fs::read_dir(store.root().join("s1")).unwrap().collect();
        assert_eq!(files.len(), 2);
        assert!(store.root().join("s1").join("00002-i01-synthesizing.json").exists());
    }

    #[tokio::test]
    async fn latest_returns_highest_seq() {
        let (_dir, store) = make_store();
        for (seq, phase) in [(1, "planning"), (3, "executing"), (2, "synthesizing")] {
            let key = CheckpointKey::new("s1", seq, 1, phase);
            store.write(&key, &json!({ "seq": seq })).await.unwrap();
        }
        let latest = store.latest("s1").await.unwrap().unwrap();
        assert_eq!(latest.key.seq, 3);
        assert_eq!(latest.document, json!({"seq": 3}));
    }

    #[tokio::test]
    async fn latest_of_unknown_session_is_none() {
        let (_dir, store) = make_store();
        assert!(store.latest("nobody").await.unwrap().is_none());
        assert!(store.list("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_missing_key_is_not_found() {
        let (_dir, store) = make_store();
        let err = store
            .load(&CheckpointKey::new("s1", 9, 1, "planning"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn rewrite_same_key_replaces_document() {
        let (_dir, store) = make_store();
        let key = CheckpointKey::new("s1", 1, 1, "planning");
        store.write(&key, &json!({"v": 1})).await.unwrap();
        store.write(&key, &json!({"v": 2})).await.unwrap();
        assert_eq!(store.load(&key).await.unwrap().document, json!({"v": 2}));
        assert_eq!(store.list("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn path_traversal_session_is_rejected() {
        let (_dir, store) = make_store();
        let key = CheckpointKey::new("../escape", 1, 1, "planning");
        let err = store.write(&key, &json!({})).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidSessionId { .. }));
    }

    #[tokio::test]
    async fn sessions_lists_directories() {
        let (_dir, store) = make_store();
        store
            .write(&CheckpointKey::new("b", 1, 1, "planning"), &json!({}))
            .await
            .unwrap();
        store
            .write(&CheckpointKey::new("a", 1, 1, "planning"), &json!({}))
            .await
            .unwrap();
        assert_eq!(store.sessions().await.unwrap(), vec!["a", "b"]);
    }
}
