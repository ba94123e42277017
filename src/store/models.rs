//! Message data models
//!
//! Defines the stored message record and the drafts the API layer builds
//! before the log assigns identity and ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of payload a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Plain text message
    Text,
    /// Uploaded image, content is a blob id
    Image,
    /// Uploaded file, content is a blob id
    File,
}

impl MessageType {
    /// Convert the type to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
        }
    }

    /// Infer the message type for an upload from its MIME type
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            MessageType::Image
        } else {
            MessageType::File
        }
    }

    /// Whether messages of this type reference a blob
    pub fn has_blob(&self) -> bool {
        matches!(self, MessageType::Image | MessageType::File)
    }
}

/// A single message as persisted in the log
///
/// Immutable once created. `content` holds the text for text messages and
/// the blob id for image/file messages. Field names match the JSON wire
/// format consumed by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Unique identifier, assigned by the log at append time
    pub id: String,
    /// Message text, or blob id for image/file messages
    pub content: String,
    /// Device label supplied by the sending client
    pub sender: String,
    /// Server-assigned creation time, the authoritative ordering key
    pub timestamp: DateTime<Utc>,
    /// Kind of payload
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Original filename of the upload (image/file only)
    pub filename: Option<String>,
    /// Size of the uploaded payload in bytes (image/file only)
    #[serde(rename = "fileSize")]
    pub file_size: Option<u64>,
    /// MIME type of the uploaded payload (image/file only)
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// A message draft handed to [`crate::store::MessageLog::append`]
///
/// The log assigns `id` and `timestamp`; everything else is fixed here.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Message text, or blob id for image/file messages
    pub content: String,
    /// Device label supplied by the sending client
    pub sender: String,
    /// Kind of payload
    pub msg_type: MessageType,
    /// Original filename of the upload (image/file only)
    pub filename: Option<String>,
    /// Size of the uploaded payload in bytes (image/file only)
    pub file_size: Option<u64>,
    /// MIME type of the uploaded payload (image/file only)
    pub mime_type: Option<String>,
}

impl NewMessage {
    /// Create a text message draft
    pub fn text(content: String, sender: String) -> Self {
        Self {
            content,
            sender,
            msg_type: MessageType::Text,
            filename: None,
            file_size: None,
            mime_type: None,
        }
    }

    /// Create an image/file message draft referencing a stored blob
    pub fn upload(
        blob_id: String,
        sender: String,
        filename: String,
        file_size: u64,
        mime_type: String,
    ) -> Self {
        Self {
            content: blob_id,
            sender,
            msg_type: MessageType::from_mime(&mime_type),
            filename: Some(filename),
            file_size: Some(file_size),
            mime_type: Some(mime_type),
        }
    }
}
