//! Storage trait definitions for Tribunal checkpoints
//!
//! A checkpoint is one JSON document per `(session_id, iteration, phase)`
//! holding a full orchestration state snapshot. Stores are backend-agnostic
//! and store the document as an opaque `serde_json::Value`; typing happens in
//! `tribunal-core`.
//!
//! An in-memory fake is provided for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Address of a single checkpoint document.
///
/// `seq` is monotonic within a session and defines ordering; `iteration` and
/// `phase` describe which phase boundary the snapshot was taken at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckpointKey {
    pub session_id: String,
    pub seq: u64,
    pub iteration: u32,
    pub phase: String,
}

impl CheckpointKey {
    pub fn new(
        session_id: impl Into<String>,
        seq: u64,
        iteration: u32,
        phase: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            seq,
            iteration,
            phase: phase.into(),
        }
    }

    /// File name used by filesystem stores: `<seq:05>-i<iteration:02>-<phase>.json`.
    pub fn file_name(&self) -> String {
        format!("{:05}-i{:02}-{}.json", self.seq, self.iteration, self.phase)
    }

    /// Inverse of [`CheckpointKey::file_name`].
    pub fn from_file_name(session_id: &str, name: &str) -> StorageResult<Self> {
        let malformed = || StorageError::MalformedFileName {
            name: name.to_string(),
        };
        let stem = name.strip_suffix(".json").ok_or_else(malformed)?;
        let mut parts = stem.splitn(3, '-');
        let seq = parts
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(malformed)?;
        let iteration = parts
            .next()
            .and_then(|s| s.strip_prefix('i'))
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(malformed)?;
        let phase = parts.next().filter(|p| !p.is_empty()).ok_or_else(malformed)?;
        Ok(Self::new(session_id, seq, iteration, phase))
    }
}

impl std::fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}#{} (iteration {}, {})",
            self.session_id, self.seq, self.iteration, self.phase
        )
    }
}

/// A stored checkpoint document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub key: CheckpointKey,
    pub document: serde_json::Value,
    pub written_at: DateTime<Utc>,
}

/// Reject session ids that would escape the store root or collide with the
/// file naming scheme.
pub fn validate_session_id(session_id: &str) -> StorageResult<()> {
    let ok = !session_id.is_empty()
        && session_id != "."
        && session_id != ".."
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidSessionId {
            session_id: session_id.to_string(),
        })
    }
}

/// Checkpoint persistence.
///
/// Guarantees:
/// - `write` is durable when it returns: a subsequent `load`/`latest` sees it.
/// - `latest` returns the record with the highest `seq` for the session.
/// - `list` returns keys ordered by `seq`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a snapshot document under `key`, replacing any previous one.
    async fn write(&self, key: &CheckpointKey, document: &serde_json::Value) -> StorageResult<()>;

    /// Load a single checkpoint. Returns `StorageError::NotFound` if absent.
    async fn load(&self, key: &CheckpointKey) -> StorageResult<CheckpointRecord>;

    /// Most recent checkpoint of a session, if any.
    async fn latest(&self, session_id: &str) -> StorageResult<Option<CheckpointRecord>>;

    /// All checkpoint keys of a session in `seq` order.
    async fn list(&self, session_id: &str) -> StorageResult<Vec<CheckpointKey>>;

    /// Ids of every session with at least one checkpoint, sorted.
    async fn sessions(&self) -> StorageResult<Vec<String>>;
}
