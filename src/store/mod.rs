//! Storage layer
//!
//! The append-only message log and the blob store for uploaded payloads.

pub mod blobs;
pub mod log;
pub mod models;

pub use blobs::BlobStore;
pub use log::MessageLog;
pub use models::{NewMessage, StoredMessage};
