//! Tribunal-State: checkpoint persistence for governance sessions
//!
//! ## Layer 0 - Data/Persistence
//!
//! Every phase transition of an orchestration session is persisted as one
//! JSON document so a crashed session can resume from its last completed
//! phase. This crate knows nothing about the shape of that document.
//!
//! ## Key Components
//!
//! - `CheckpointStore`: async, backend-agnostic persistence trait
//! - `FsCheckpointStore`: one file per checkpoint, atomic rename on write
//! - `fakes::MemoryCheckpointStore`: in-memory fake with failure injection

mod error;
pub mod fakes;
pub mod fs_store;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_store::FsCheckpointStore;
pub use storage_traits::{
    validate_session_id, CheckpointKey, CheckpointRecord, CheckpointStore, StorageResult,
};
