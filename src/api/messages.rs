//! Message API handlers
//!
//! HTTP endpoints for the message log: full listing for initial client
//! load, text ingest, and the incremental poll protocol.

use crate::error::AppError;
use crate::state::AppState;
use crate::store::{NewMessage, StoredMessage};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to send a text message
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Message text
    pub content: String,
    /// Device label of the sender
    pub sender: String,
    /// Message type; only "text" is accepted here (uploads go to /api/upload)
    #[serde(rename = "type")]
    pub msg_type: String,
}

/// Query parameters for the poll endpoint
#[derive(Debug, Deserialize)]
pub struct PollParams {
    /// Cursor from the previous poll (RFC 3339); omit for everything
    pub since: Option<String>,
}

/// Response for the poll endpoint
#[derive(Debug, Serialize)]
pub struct PollResponse {
    /// Messages strictly after the cursor
    pub messages: Vec<StoredMessage>,
    /// Cursor to use for the next poll
    pub timestamp: DateTime<Utc>,
}

/// GET /api/messages - Full message history, oldest first
pub async fn list_messages(State(state): State<AppState>) -> Json<Vec<StoredMessage>> {
    Json(state.log.list_all().await)
}

/// POST /api/messages - Append a text message
pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<StoredMessage>), AppError> {
    if request.content.trim().is_empty() {
        return Err(AppError::Validation("content must not be empty".to_string()));
    }
    if request.sender.trim().is_empty() {
        return Err(AppError::Validation("sender must not be empty".to_string()));
    }
    if request.msg_type != "text" {
        return Err(AppError::Validation(format!(
            "type must be \"text\", got {:?}; use /api/upload for files",
            request.msg_type
        )));
    }

    let message = state
        .log
        .append(NewMessage::text(request.content, request.sender))
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/messages/poll?since=<timestamp> - Incremental sync
///
/// Returns messages strictly after `since` and the cursor to use next
/// time. Polling with the returned cursor never repeats and never skips a
/// message; an empty list with an advanced cursor is the idle case.
pub async fn poll_messages(
    State(state): State<AppState>,
    Query(params): Query<PollParams>,
) -> Result<Json<PollResponse>, AppError> {
    let since = match params.since.as_deref() {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|e| AppError::Validation(format!("Invalid since cursor {:?}: {}", raw, e)))?
            .with_timezone(&Utc),
        None => DateTime::<Utc>::UNIX_EPOCH,
    };

    let (messages, timestamp) = state.log.list_since(since).await;
    Ok(Json(PollResponse {
        messages,
        timestamp,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::{tempdir, TempDir};

    fn create_test_state(dir: &TempDir) -> AppState {
        let mut config = Config::from_env();
        config.storage.data_dir = dir.path().to_path_buf();
        AppState::new(&config).expect("Failed to create test state")
    }

    fn text_request(content: &str, sender: &str) -> SendMessageRequest {
        SendMessageRequest {
            content: content.to_string(),
            sender: sender.to_string(),
            msg_type: "text".to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_then_list() {
        let dir = tempdir().expect("Failed to create temp dir");
        let state = create_test_state(&dir);
        let before = Utc::now();

        let (status, Json(created)) =
            send_message(State(state.clone()), Json(text_request("hi", "iPhone")))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.content, "hi");
        assert_eq!(created.sender, "iPhone");
        assert!(created.timestamp >= before);

        let Json(all) = list_messages(State(state)).await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, created.id);
    }

    #[tokio::test]
    async fn test_send_rejects_empty_content() {
        let dir = tempdir().expect("Failed to create temp dir");
        let state = create_test_state(&dir);

        let result = send_message(State(state), Json(text_request("   ", "iPhone"))).await;
        match result.unwrap_err() {
            AppError::Validation(_) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_rejects_non_text_type() {
        let dir = tempdir().expect("Failed to create temp dir");
        let state = create_test_state(&dir);

        let mut request = text_request("hi", "iPhone");
        request.msg_type = "image".to_string();
        let result = send_message(State(state), Json(request)).await;
        match result.unwrap_err() {
            AppError::Validation(_) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_poll_at_head_returns_empty_with_advanced_cursor() {
        let dir = tempdir().expect("Failed to create temp dir");
        let state = create_test_state(&dir);

        let (_, Json(created)) =
            send_message(State(state.clone()), Json(text_request("hi", "iPhone")))
                .await
                .unwrap();

        let params = PollParams {
            since: Some(created.timestamp.to_rfc3339()),
        };
        let Json(response) = poll_messages(State(state), Query(params)).await.unwrap();
        assert!(response.messages.is_empty());
        assert!(response.timestamp >= created.timestamp);
    }

    #[tokio::test]
    async fn test_poll_cursor_chains_without_loss_or_duplication() {
        let dir = tempdir().expect("Failed to create temp dir");
        let state = create_test_state(&dir);

        send_message(State(state.clone()), Json(text_request("one", "a")))
            .await
            .unwrap();

        let Json(first) = poll_messages(State(state.clone()), Query(PollParams { since: None }))
            .await
            .unwrap();
        assert_eq!(first.messages.len(), 1);

        send_message(State(state.clone()), Json(text_request("two", "a")))
            .await
            .unwrap();

        let params = PollParams {
            since: Some(first.timestamp.to_rfc3339()),
        };
        let Json(second) = poll_messages(State(state), Query(params)).await.unwrap();
        assert_eq!(second.messages.len(), 1);
        assert_eq!(second.messages[0].content, "two");
    }

    #[tokio::test]
    async fn test_poll_rejects_malformed_cursor() {
        let dir = tempdir().expect("Failed to create temp dir");
        let state = create_test_state(&dir);

        let params = PollParams {
            since: Some("yesterday-ish".to_string()),
        };
        let result = poll_messages(State(state), Query(params)).await;
        match result.unwrap_err() {
            AppError::Validation(_) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }
}
