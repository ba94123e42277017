//! Application state management
//!
//! Wires the message log and blob store together behind one cloneable
//! handle shared by every request handler.

use crate::config::Config;
use crate::error::AppError;
use crate::store::{BlobStore, MessageLog};
use std::path::PathBuf;
use std::sync::Arc;

/// Shared handles to the storage layer
///
/// Cheap to clone; the log and blob store carry their own interior
/// synchronization.
#[derive(Clone)]
pub struct AppState {
    /// Append-only message log
    pub log: Arc<MessageLog>,
    /// Blob store for uploaded payloads
    pub blobs: Arc<BlobStore>,
}

impl AppState {
    /// Open the stores under the configured data directory
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let data_dir = &config.storage.data_dir;
        let log = MessageLog::open(data_dir.join("messages.jsonl"))?;
        let blobs = BlobStore::open(data_dir.join("blobs"), config.storage.max_upload_bytes)?;
        Ok(Self {
            log: Arc::new(log),
            blobs: Arc::new(blobs),
        })
    }

    /// Path of the persisted recycle bin index
    pub fn recycle_index_path(config: &Config) -> PathBuf {
        config.storage.data_dir.join("recycle.json")
    }
}
