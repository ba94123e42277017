//! Retention manager
//!
//! Periodic sweep that ages message/blob pairs through
//! Active -> RecycleBin -> Purged. Recycled messages stay in storage but
//! drop out of default chat views and can be restored; purged messages are
//! removed from the log and their blob is deleted. The sweep runs outside
//! the request path and takes the same write serialization as any other
//! log writer.

use crate::config::RetentionConfig;
use crate::error::AppError;
use crate::store::{BlobStore, MessageLog, StoredMessage};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Serializable structure for the recycle bin index
///
/// Tracks when each message entered the bin, so the purge clock survives
/// restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecycleBinData {
    /// Version of the index format (for future migration support)
    version: u32,
    /// Map of message id to the time it entered the bin
    entries: HashMap<String, DateTime<Utc>>,
}

/// Persisted recycle bin index
#[derive(Debug)]
pub struct RecycleBin {
    path: PathBuf,
    entries: HashMap<String, DateTime<Utc>>,
}

impl RecycleBin {
    /// Load the bin index from `path`; a missing file is an empty bin
    ///
    /// An unusable index (torn write, unknown version) must not keep the
    /// server from starting: it is moved aside with a warning and the bin
    /// starts empty. Affected messages simply age through a fresh bin
    /// window. Only a real read failure is surfaced.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    path,
                    entries: HashMap::new(),
                });
            }
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "Failed to read recycle index: {}",
                    e
                )))
            }
        };

        let entries = match serde_json::from_str::<RecycleBinData>(&json) {
            Ok(data) if data.version == 1 => data.entries,
            Ok(data) => {
                warn!("Unsupported recycle index version {}, starting empty", data.version);
                Self::move_aside(&path);
                HashMap::new()
            }
            Err(e) => {
                warn!("Unreadable recycle index {}: {}, starting empty", path.display(), e);
                Self::move_aside(&path);
                HashMap::new()
            }
        };

        Ok(Self { path, entries })
    }

    /// Keep a broken index around for inspection instead of overwriting it
    fn move_aside(path: &Path) {
        let aside = path.with_extension("json.corrupt");
        if let Err(e) = std::fs::rename(path, &aside) {
            warn!("Failed to move broken recycle index aside: {}", e);
        }
    }

    /// Write the bin index back to disk via a temp file and rename, so a
    /// crash mid-save never leaves a torn index behind
    fn save(&self) -> Result<(), AppError> {
        let data = RecycleBinData {
            version: 1,
            entries: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| AppError::Storage(format!("Failed to serialize recycle index: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        self.try_save(&tmp, &json)
            .map_err(|e| AppError::Storage(format!("Failed to write recycle index: {}", e)))?;
        Ok(())
    }

    fn try_save(&self, tmp: &Path, json: &str) -> std::io::Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_data()?;
        std::fs::rename(tmp, &self.path)
    }

    /// Ids currently in the bin
    pub fn ids(&self) -> std::collections::HashSet<String> {
        self.entries.keys().cloned().collect()
    }
}

/// Counters for one retention sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Messages moved from active to the recycle bin
    pub recycled: usize,
    /// Message/blob pairs permanently purged
    pub purged: usize,
    /// Records skipped because their transition failed
    pub errors: usize,
}

/// Background policy that ages messages out of the store
pub struct RetentionManager {
    log: Arc<MessageLog>,
    blobs: Arc<BlobStore>,
    bin: Mutex<RecycleBin>,
    active_for: Duration,
    recycled_for: Duration,
    sweep_interval_secs: u64,
}

impl RetentionManager {
    /// Create the manager, loading the persisted bin index and hiding its
    /// entries from the log's default views
    pub async fn new(
        log: Arc<MessageLog>,
        blobs: Arc<BlobStore>,
        config: &RetentionConfig,
        bin_path: impl AsRef<Path>,
    ) -> Result<Self, AppError> {
        let bin = RecycleBin::load(bin_path)?;
        log.set_hidden(bin.ids()).await;
        if !bin.entries.is_empty() {
            info!("Recycle bin holds {} messages", bin.entries.len());
        }

        Ok(Self {
            log,
            blobs,
            bin: Mutex::new(bin),
            active_for: Duration::days(config.active_days),
            recycled_for: Duration::days(config.recycle_days),
            sweep_interval_secs: config.sweep_interval_secs,
        })
    }

    /// Run sweeps forever on the configured interval
    pub async fn run(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.sweep_interval_secs));
        loop {
            interval.tick().await;
            let stats = self.sweep().await;
            if stats != SweepStats::default() {
                info!(
                    recycled = stats.recycled,
                    purged = stats.purged,
                    errors = stats.errors,
                    "Retention sweep completed"
                );
            }
        }
    }

    /// Sweep using the current clock
    pub async fn sweep(&self) -> SweepStats {
        self.sweep_at(Utc::now()).await
    }

    /// Evaluate every record's retention state as of `now`
    ///
    /// Each record is handled independently: a failed transition is logged
    /// and counted, and the sweep moves on to the next candidate.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepStats {
        let mut stats = SweepStats::default();
        let snapshot = self.log.snapshot().await;
        let mut bin = self.bin.lock().await;
        let mut dirty = false;

        for message in &snapshot {
            match bin.entries.get(&message.id).copied() {
                Some(binned_at) => {
                    if now - binned_at >= self.recycled_for {
                        match self.purge(message).await {
                            Ok(()) => {
                                bin.entries.remove(&message.id);
                                dirty = true;
                                stats.purged += 1;
                            }
                            Err(e) => {
                                error!("Failed to purge message {}: {}", message.id, e);
                                stats.errors += 1;
                            }
                        }
                    }
                }
                None => {
                    if now - message.timestamp >= self.active_for {
                        if self.log.hide(&message.id).await {
                            bin.entries.insert(message.id.clone(), now);
                            dirty = true;
                            stats.recycled += 1;
                        } else {
                            error!("Failed to recycle message {}: not in log", message.id);
                            stats.errors += 1;
                        }
                    }
                }
            }
        }

        // Drop bin entries whose message no longer exists in the log.
        let live: std::collections::HashSet<&str> =
            snapshot.iter().map(|m| m.id.as_str()).collect();
        let before = bin.entries.len();
        bin.entries.retain(|id, _| live.contains(id.as_str()));
        dirty |= bin.entries.len() != before;

        if dirty {
            if let Err(e) = bin.save() {
                error!("Failed to persist recycle index: {}", e);
                stats.errors += 1;
            }
        }

        stats
    }

    /// Remove a message from the log and delete its blob
    ///
    /// The log removal is the commit point: once it succeeds the message is
    /// gone for every reader. A failed blob delete is logged and does not
    /// resurrect the metadata record.
    async fn purge(&self, message: &StoredMessage) -> Result<(), AppError> {
        let removed = self.log.remove(&message.id).await?;

        if removed.is_some() && message.msg_type.has_blob() {
            if let Err(e) = self.blobs.delete(&message.content).await {
                warn!(
                    "Failed to delete blob {} for purged message {}: {}",
                    message.content, message.id, e
                );
            }
        }
        Ok(())
    }

    /// Bring a recycled message back to the active state
    #[allow(dead_code)] // Reserved for the restore endpoint
    pub async fn restore(&self, id: &str) -> Result<bool, AppError> {
        let mut bin = self.bin.lock().await;
        if bin.entries.remove(id).is_none() {
            return Ok(false);
        }
        bin.save()?;
        Ok(self.log.restore(id).await)
    }
}
