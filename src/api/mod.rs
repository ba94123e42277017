//! API module
//!
//! Contains HTTP request handlers for the message, upload, and file
//! endpoints, plus the router wiring them to application state.

use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub mod files;
pub mod messages;
pub mod upload;

/// Build the API router over the shared application state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/api/messages/poll", get(messages::poll_messages))
        .route("/api/upload", post(upload::upload_file))
        .route("/api/files/:blob_id", get(files::get_file))
        .with_state(state)
}
