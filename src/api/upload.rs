//! Upload API handler
//!
//! Accepts multipart file uploads, writes the payload to the blob store,
//! and appends the referencing image/file message to the log. From the
//! caller's perspective the pair is created atomically: a failed append
//! removes the orphaned blob before the error surfaces.

use crate::error::AppError;
use crate::state::AppState;
use crate::store::{blobs, NewMessage, StoredMessage};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::Json,
};
use tracing::{info, warn};

struct UploadedFile {
    filename: String,
    mime_type: String,
    bytes: axum::body::Bytes,
}

/// POST /api/upload - Store a file and append the message referencing it
///
/// Multipart form fields: `file` (the payload) and `sender` (device
/// label). The message type is inferred from the MIME type: `image/*`
/// becomes an image message, everything else a file message.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<StoredMessage>), AppError> {
    let mut sender = String::new();
    let mut upload: Option<UploadedFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read multipart field: {}", e)))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "sender" => {
                sender = field.text().await.map_err(|e| {
                    AppError::Validation(format!("Failed to read sender field: {}", e))
                })?;
            }
            "file" => {
                let filename = field
                    .file_name()
                    .map(|s| s.to_string())
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| {
                        AppError::Validation("file field is missing a filename".to_string())
                    })?;
                let declared_mime = field.content_type().map(|s| s.to_string());
                let bytes = field.bytes().await.map_err(|e| {
                    AppError::Validation(format!("Failed to read file data: {}", e))
                })?;

                let mime_type = declared_mime
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| blobs::content_type(&filename).to_string());
                upload = Some(UploadedFile {
                    filename,
                    mime_type,
                    bytes,
                });
            }
            other => {
                warn!("Unknown multipart field: {}", other);
            }
        }
    }

    let upload = upload
        .ok_or_else(|| AppError::Validation("file field is required".to_string()))?;
    if sender.trim().is_empty() {
        return Err(AppError::Validation("sender must not be empty".to_string()));
    }

    let blob_id = state.blobs.put(&upload.bytes, &upload.filename).await?;

    let draft = NewMessage::upload(
        blob_id.clone(),
        sender,
        upload.filename,
        upload.bytes.len() as u64,
        upload.mime_type,
    );
    let message = match state.log.append(draft).await {
        Ok(message) => message,
        Err(e) => {
            // Append failed: the pair must not be half-created, so drop the
            // orphaned blob before surfacing the error.
            if let Err(cleanup) = state.blobs.delete(&blob_id).await {
                warn!("Failed to remove orphaned blob {}: {}", blob_id, cleanup);
            }
            return Err(e);
        }
    };

    info!(
        "Stored upload {} as {} message {} ({} bytes)",
        message.filename.as_deref().unwrap_or("?"),
        message.msg_type.as_str(),
        message.id,
        message.file_size.unwrap_or(0)
    );
    Ok((StatusCode::CREATED, Json(message)))
}
