//! Append-only message log
//!
//! Durable, time-ordered record of all messages, persisted as one JSON
//! record per line. The log is the single source of ordering truth: it
//! assigns ids and timestamps under one write lock, so concurrent appends
//! can never share an id or invert the persisted order.

use crate::error::AppError;
use crate::store::models::{NewMessage, StoredMessage};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Number of attempts for a durable write before surfacing a storage error
const WRITE_ATTEMPTS: u32 = 3;

struct LogInner {
    messages: Vec<StoredMessage>,
    /// Ids currently in the recycle bin, excluded from default views
    hidden: HashSet<String>,
}

/// Append-only, time-ordered message log backed by a JSONL file
///
/// Writers (`append`, `remove`, `hide`, `restore`) serialize on one write
/// lock; readers take concurrent snapshots. The microsecond watermark
/// tracks both the newest assigned timestamp and every cursor handed out
/// by [`MessageLog::list_since`], so a later append always lands strictly
/// after any cursor a poller already holds.
pub struct MessageLog {
    path: PathBuf,
    inner: RwLock<LogInner>,
    watermark_micros: AtomicI64,
}

impl MessageLog {
    /// Open the log at `path`, creating it (and parent directories) if missing
    ///
    /// Unparseable lines are skipped with a warning rather than failing the
    /// whole load, so one corrupt record cannot take the store down.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Storage(format!("Failed to create data directory: {}", e)))?;
        }

        let mut messages = Vec::new();
        match std::fs::File::open(&path) {
            Ok(file) => {
                let reader = BufReader::new(file);
                for (line_no, line) in reader.lines().enumerate() {
                    let line = line.map_err(|e| {
                        AppError::Storage(format!("Failed to read message log: {}", e))
                    })?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<StoredMessage>(&line) {
                        Ok(message) => messages.push(message),
                        Err(e) => {
                            warn!(
                                "Skipping unparseable record at {}:{}: {}",
                                path.display(),
                                line_no + 1,
                                e
                            );
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "Failed to open message log: {}",
                    e
                )))
            }
        }

        let watermark = messages
            .iter()
            .map(|m| m.timestamp.timestamp_micros())
            .max()
            .unwrap_or(0);

        info!(
            "Loaded {} messages from {}",
            messages.len(),
            path.display()
        );

        Ok(Self {
            path,
            inner: RwLock::new(LogInner {
                messages,
                hidden: HashSet::new(),
            }),
            watermark_micros: AtomicI64::new(watermark),
        })
    }

    /// Append a message, assigning its id and timestamp
    ///
    /// The timestamp is the current server clock, clamped strictly above the
    /// watermark so append order, timestamp order, and handed-out cursors
    /// all agree. The record is durably written before it becomes visible
    /// to readers; a failed write leaves no partial message.
    pub async fn append(&self, draft: NewMessage) -> Result<StoredMessage, AppError> {
        let mut inner = self.inner.write().await;

        let now = Utc::now().timestamp_micros();
        let ts_micros = now.max(self.watermark_micros.load(Ordering::SeqCst) + 1);
        let timestamp = DateTime::from_timestamp_micros(ts_micros)
            .ok_or_else(|| AppError::Storage("Timestamp out of range".to_string()))?;

        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            content: draft.content,
            sender: draft.sender,
            timestamp,
            msg_type: draft.msg_type,
            filename: draft.filename,
            file_size: draft.file_size,
            mime_type: draft.mime_type,
        };

        let line = serde_json::to_string(&message)
            .map_err(|e| AppError::Storage(format!("Failed to serialize message: {}", e)))?;
        self.append_line(&line)?;

        self.watermark_micros.fetch_max(ts_micros, Ordering::SeqCst);
        inner.messages.push(message.clone());

        debug!("Appended message {} at {}", message.id, message.timestamp);
        Ok(message)
    }

    /// Durably append one line, retrying a bounded number of times
    fn append_line(&self, line: &str) -> Result<(), AppError> {
        let mut last_err = None;
        for attempt in 1..=WRITE_ATTEMPTS {
            match self.try_append_line(line) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "Append attempt {}/{} failed: {}",
                        attempt, WRITE_ATTEMPTS, e
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(AppError::Storage(format!(
            "Failed to append message after {} attempts: {}",
            WRITE_ATTEMPTS,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn try_append_line(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        file.sync_data()
    }

    /// All active messages, oldest first
    pub async fn list_all(&self) -> Vec<StoredMessage> {
        let inner = self.inner.read().await;
        inner
            .messages
            .iter()
            .filter(|m| !inner.hidden.contains(&m.id))
            .cloned()
            .collect()
    }

    /// Active messages strictly after `since`, plus the next poll cursor
    ///
    /// The cursor is a snapshot taken after draining the log: every message
    /// committed before this call returns is either in the result or at or
    /// before the cursor, and any later append lands strictly after it. So
    /// chained polls never skip and never repeat a message.
    pub async fn list_since(&self, since: DateTime<Utc>) -> (Vec<StoredMessage>, DateTime<Utc>) {
        let inner = self.inner.read().await;
        let messages: Vec<StoredMessage> = inner
            .messages
            .iter()
            .filter(|m| !inner.hidden.contains(&m.id) && m.timestamp > since)
            .cloned()
            .collect();

        // Raising the watermark here pins the cursor: no later append can be
        // assigned a timestamp at or before it.
        let now = Utc::now().timestamp_micros();
        let prev = self.watermark_micros.fetch_max(now, Ordering::SeqCst);
        let cursor_micros = prev.max(now).max(since.timestamp_micros());
        let cursor = DateTime::from_timestamp_micros(cursor_micros).unwrap_or(since);

        (messages, cursor)
    }

    /// MIME type recorded on the message that owns `blob_id`, if any
    pub async fn blob_mime_type(&self, blob_id: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .messages
            .iter()
            .find(|m| m.msg_type.has_blob() && m.content == blob_id)
            .and_then(|m| m.mime_type.clone())
    }

    /// Every message in the log, including recycled ones (retention use)
    pub async fn snapshot(&self) -> Vec<StoredMessage> {
        let inner = self.inner.read().await;
        inner.messages.clone()
    }

    /// Mark the ids as recycled on startup, before the log serves requests
    pub async fn set_hidden(&self, ids: HashSet<String>) {
        let mut inner = self.inner.write().await;
        inner.hidden = ids;
    }

    /// Hide a message from default views; returns false if it does not exist
    pub async fn hide(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        if inner.messages.iter().any(|m| m.id == id) {
            inner.hidden.insert(id.to_string());
            true
        } else {
            false
        }
    }

    /// Make a recycled message visible again
    #[allow(dead_code)] // Reserved for the restore endpoint
    pub async fn restore(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.hidden.remove(id)
    }

    /// Permanently remove a message, rewriting the backing file
    ///
    /// Returns the removed message so the caller can release its blob, or
    /// `None` if the id is already gone (removal is idempotent).
    pub async fn remove(&self, id: &str) -> Result<Option<StoredMessage>, AppError> {
        let mut inner = self.inner.write().await;
        let Some(index) = inner.messages.iter().position(|m| m.id == id) else {
            return Ok(None);
        };

        let mut remaining = String::new();
        for (i, message) in inner.messages.iter().enumerate() {
            if i == index {
                continue;
            }
            let line = serde_json::to_string(message)
                .map_err(|e| AppError::Storage(format!("Failed to serialize message: {}", e)))?;
            remaining.push_str(&line);
            remaining.push('\n');
        }
        self.rewrite(&remaining)?;

        let removed = inner.messages.remove(index);
        inner.hidden.remove(id);
        debug!("Removed message {} from log", id);
        Ok(Some(removed))
    }

    /// Atomically replace the backing file via a temp file and rename
    fn rewrite(&self, contents: &str) -> Result<(), AppError> {
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut last_err = None;
        for attempt in 1..=WRITE_ATTEMPTS {
            match self.try_rewrite(&tmp, contents) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "Rewrite attempt {}/{} failed: {}",
                        attempt, WRITE_ATTEMPTS, e
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(AppError::Storage(format!(
            "Failed to rewrite message log after {} attempts: {}",
            WRITE_ATTEMPTS,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn try_rewrite(&self, tmp: &Path, contents: &str) -> std::io::Result<()> {
        let mut file = std::fs::File::create(tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_data()?;
        std::fs::rename(tmp, &self.path)
    }
}
