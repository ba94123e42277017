//! File download API handler
//!
//! Serves stored blob bytes back to clients. Returns 404 once the blob has
//! been purged by retention (or never existed).

use crate::error::AppError;
use crate::state::AppState;
use crate::store::blobs;
use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};

/// GET /api/files/:blob_id - Raw blob bytes
///
/// The content type is the MIME type recorded on the owning message at
/// upload time, falling back to the blob id's extension for blobs whose
/// message is already gone.
pub async fn get_file(
    State(state): State<AppState>,
    Path(blob_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let bytes = state.blobs.get(&blob_id).await?;
    let content_type = state
        .log
        .blob_mime_type(&blob_id)
        .await
        .unwrap_or_else(|| blobs::content_type(&blob_id).to_string());
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::NewMessage;
    use tempfile::{tempdir, TempDir};

    fn create_test_state(dir: &TempDir) -> AppState {
        let mut config = Config::from_env();
        config.storage.data_dir = dir.path().to_path_buf();
        AppState::new(&config).expect("Failed to create test state")
    }

    #[tokio::test]
    async fn test_get_file_roundtrip() {
        let dir = tempdir().expect("Failed to create temp dir");
        let state = create_test_state(&dir);

        let blob_id = state.blobs.put(b"ten bytes!", "a.txt").await.unwrap();
        let result = get_file(State(state), Path(blob_id)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_get_file_missing_is_not_found() {
        let dir = tempdir().expect("Failed to create temp dir");
        let state = create_test_state(&dir);

        let result = get_file(State(state), Path("missing.bin".to_string())).await;
        match result {
            Err(AppError::NotFound(_)) => {}
            Err(other) => panic!("Expected NotFound error, got: {:?}", other),
            Ok(_) => panic!("Expected NotFound error, got a response"),
        }
    }

    #[tokio::test]
    async fn test_get_file_serves_recorded_mime_type() {
        let dir = tempdir().expect("Failed to create temp dir");
        let state = create_test_state(&dir);

        // text/csv is not in the extension table; the message record is the
        // only place that MIME type lives.
        let blob_id = state.blobs.put(b"a,b\n1,2\n", "data.csv").await.unwrap();
        state
            .log
            .append(NewMessage::upload(
                blob_id.clone(),
                "laptop".to_string(),
                "data.csv".to_string(),
                8,
                "text/csv".to_string(),
            ))
            .await
            .unwrap();

        let response = match get_file(State(state), Path(blob_id)).await {
            Ok(response) => response.into_response(),
            Err(e) => panic!("Expected response, got: {:?}", e),
        };
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
    }

    #[tokio::test]
    async fn test_get_file_falls_back_to_extension() {
        let dir = tempdir().expect("Failed to create temp dir");
        let state = create_test_state(&dir);

        // No owning message: the extension table decides.
        let blob_id = state.blobs.put(b"\x89PNG fake", "shot.png").await.unwrap();
        let response = match get_file(State(state), Path(blob_id)).await {
            Ok(response) => response.into_response(),
            Err(e) => panic!("Expected response, got: {:?}", e),
        };
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    }
}
