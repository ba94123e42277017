//! Blob store
//!
//! Filesystem-backed storage for uploaded binary payloads. Blobs are keyed
//! by a server-generated id, never by the client-supplied filename, so a
//! hostile filename cannot collide with or escape the storage directory.

use crate::error::AppError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest file extension carried over into a generated blob id
const MAX_EXT_LEN: usize = 10;

/// Filesystem-backed store for uploaded payloads
pub struct BlobStore {
    root: PathBuf,
    max_bytes: usize,
}

impl BlobStore {
    /// Open the blob store rooted at `root`, creating the directory if missing
    pub fn open<P: AsRef<Path>>(root: P, max_bytes: usize) -> Result<Self, AppError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| AppError::Storage(format!("Failed to create blob directory: {}", e)))?;
        info!("Blob store at {} (limit {} bytes)", root.display(), max_bytes);
        Ok(Self { root, max_bytes })
    }

    /// Store `bytes`, returning a generated blob id
    ///
    /// The id is a fresh UUID plus the sanitized extension of
    /// `original_filename`; the original name itself is never used as a
    /// storage key. Oversized payloads are rejected before any write.
    pub async fn put(&self, bytes: &[u8], original_filename: &str) -> Result<String, AppError> {
        if bytes.len() > self.max_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "Upload is {} bytes, limit is {}",
                bytes.len(),
                self.max_bytes
            )));
        }

        let blob_id = format!(
            "{}.{}",
            Uuid::new_v4(),
            sanitize_extension(original_filename)
        );
        let path = self.root.join(&blob_id);

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to create blob file: {}", e)))?;
        file.write_all(bytes)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write blob: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to sync blob: {}", e)))?;

        debug!("Stored blob {} ({} bytes)", blob_id, bytes.len());
        Ok(blob_id)
    }

    /// Fetch the bytes of a stored blob
    pub async fn get(&self, blob_id: &str) -> Result<Vec<u8>, AppError> {
        let path = self.resolve(blob_id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("Blob not found: {}", blob_id)))
            }
            Err(e) => Err(AppError::Storage(format!("Failed to read blob: {}", e))),
        }
    }

    /// Delete a stored blob; deleting a missing blob is a no-op
    pub async fn delete(&self, blob_id: &str) -> Result<(), AppError> {
        let path = self.resolve(blob_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted blob {}", blob_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!("Failed to delete blob: {}", e))),
        }
    }

    /// Map a blob id to its on-disk path, rejecting anything that is not a
    /// plain generated-id filename
    fn resolve(&self, blob_id: &str) -> Result<PathBuf, AppError> {
        if !is_valid_blob_id(blob_id) {
            warn!("Rejected malformed blob id: {:?}", blob_id);
            return Err(AppError::NotFound(format!("Blob not found: {}", blob_id)));
        }
        Ok(self.root.join(blob_id))
    }
}

/// Reduce a client filename to a safe lowercase extension for the blob id
fn sanitize_extension(filename: &str) -> String {
    let ext: String = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(MAX_EXT_LEN)
        .collect::<String>()
        .to_lowercase();
    if ext.is_empty() {
        "bin".to_string()
    } else {
        ext
    }
}

/// A valid id is a single path component of id-safe characters
fn is_valid_blob_id(blob_id: &str) -> bool {
    !blob_id.is_empty()
        && !blob_id.starts_with('.')
        && blob_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

/// Content type for a blob, inferred from its id's extension
pub fn content_type(blob_id: &str) -> &'static str {
    let extension = blob_id.rsplit('.').next().unwrap_or("");
    match extension {
        "html" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "xml" => "application/xml",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
