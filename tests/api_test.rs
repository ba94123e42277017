//! Router-level tests for the message, upload, and file endpoints

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use droplog_backend::api;
use droplog_backend::config::Config;
use droplog_backend::state::AppState;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

fn create_test_state(dir: &TempDir) -> AppState {
    let mut config = Config::from_env();
    config.storage.data_dir = dir.path().to_path_buf();
    AppState::new(&config).expect("Failed to create test state")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).expect("Response body should be JSON")
}

fn send_text_request(content: &str, sender: &str) -> Request<Body> {
    let body = serde_json::json!({
        "content": content,
        "sender": sender,
        "type": "text",
    });
    Request::builder()
        .method("POST")
        .uri("/api/messages")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn upload_request(filename: &str, content_type: &str, payload: &[u8]) -> Request<Body> {
    let boundary = "droplog-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"sender\"\r\n\r\niPhone\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_send_text_message_then_list() {
    let dir = tempdir().expect("Failed to create temp dir");
    let state = create_test_state(&dir);
    let before = chrono::Utc::now();

    let response = api::router(state.clone())
        .oneshot(send_text_request("hi", "iPhone"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["content"], "hi");
    assert_eq!(created["sender"], "iPhone");
    assert_eq!(created["type"], "text");

    let timestamp: chrono::DateTime<chrono::Utc> = created["timestamp"]
        .as_str()
        .unwrap()
        .parse()
        .expect("timestamp should be RFC 3339");
    assert!(timestamp >= before);

    let response = api::router(state)
        .oneshot(
            Request::builder()
                .uri("/api/messages")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], created["id"]);
}

#[tokio::test]
async fn test_send_rejects_missing_fields() {
    let dir = tempdir().expect("Failed to create temp dir");
    let state = create_test_state(&dir);

    let response = api::router(state)
        .oneshot(send_text_request("", "iPhone"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await;
    assert!(error["error"].as_str().unwrap().contains("content"));
}

#[tokio::test]
async fn test_upload_file_and_download_roundtrip() {
    let dir = tempdir().expect("Failed to create temp dir");
    let state = create_test_state(&dir);

    let response = api::router(state.clone())
        .oneshot(upload_request("a.txt", "text/plain", b"ten bytes!"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let message = body_json(response).await;
    assert_eq!(message["type"], "file");
    assert_eq!(message["filename"], "a.txt");
    assert_eq!(message["fileSize"], 10);
    assert_eq!(message["mimeType"], "text/plain");

    let blob_id = message["content"].as_str().unwrap().to_string();
    let response = api::router(state)
        .oneshot(
            Request::builder()
                .uri(format!("/api/files/{}", blob_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ten bytes!");
}

#[tokio::test]
async fn test_download_serves_the_uploaded_mime_type() {
    let dir = tempdir().expect("Failed to create temp dir");
    let state = create_test_state(&dir);

    // text/csv has no entry in the extension fallback table; the recorded
    // message MIME type must win.
    let response = api::router(state.clone())
        .oneshot(upload_request("data.csv", "text/csv", b"a,b\n1,2\n"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let message = body_json(response).await;
    assert_eq!(message["mimeType"], "text/csv");

    let blob_id = message["content"].as_str().unwrap().to_string();
    let response = api::router(state)
        .oneshot(
            Request::builder()
                .uri(format!("/api/files/{}", blob_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
}

#[tokio::test]
async fn test_upload_image_is_typed_as_image() {
    let dir = tempdir().expect("Failed to create temp dir");
    let state = create_test_state(&dir);

    let response = api::router(state)
        .oneshot(upload_request("photo.png", "image/png", b"\x89PNG fake"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let message = body_json(response).await;
    assert_eq!(message["type"], "image");
    assert_eq!(message["mimeType"], "image/png");
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let dir = tempdir().expect("Failed to create temp dir");
    let mut config = Config::from_env();
    config.storage.data_dir = dir.path().to_path_buf();
    config.storage.max_upload_bytes = 8;
    let state = AppState::new(&config).expect("Failed to create test state");

    let response = api::router(state.clone())
        .oneshot(upload_request("big.bin", "application/octet-stream", &[0u8; 64]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    // Nothing was appended to the log.
    assert!(state.log.list_all().await.is_empty());
}

#[tokio::test]
async fn test_missing_file_is_not_found() {
    let dir = tempdir().expect("Failed to create temp dir");
    let state = create_test_state(&dir);

    let response = api::router(state)
        .oneshot(
            Request::builder()
                .uri("/api/files/nope.bin")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_poll_protocol_over_http() {
    let dir = tempdir().expect("Failed to create temp dir");
    let state = create_test_state(&dir);

    api::router(state.clone())
        .oneshot(send_text_request("first", "laptop"))
        .await
        .unwrap();

    // First poll without a cursor drains everything.
    let response = api::router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/api/messages/poll")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = body_json(response).await;
    assert_eq!(first["messages"].as_array().unwrap().len(), 1);
    let cursor = first["timestamp"].as_str().unwrap().to_string();

    // Polling at the head returns an empty list and a fresh cursor.
    let response = api::router(state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/api/messages/poll?since={}", urlencode(&cursor)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let idle = body_json(response).await;
    assert!(idle["messages"].as_array().unwrap().is_empty());

    // A new message shows up on the next poll with the previous cursor.
    api::router(state.clone())
        .oneshot(send_text_request("second", "laptop"))
        .await
        .unwrap();
    let response = api::router(state)
        .oneshot(
            Request::builder()
                .uri(format!("/api/messages/poll?since={}", urlencode(&cursor)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let next = body_json(response).await;
    let messages = next["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "second");
}

#[tokio::test]
async fn test_poll_with_bad_cursor_is_bad_request() {
    let dir = tempdir().expect("Failed to create temp dir");
    let state = create_test_state(&dir);

    let response = api::router(state)
        .oneshot(
            Request::builder()
                .uri("/api/messages/poll?since=not-a-time")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// Percent-encode the handful of characters an RFC 3339 cursor can carry
fn urlencode(raw: &str) -> String {
    raw.replace('+', "%2B").replace(':', "%3A")
}
