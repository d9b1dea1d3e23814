use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use observation_sync::api::TranscriptionResponse;
use observation_sync::{create_router, AppState};
use tower::ServiceExt;

async fn send(state: &AppState, method: &str, uri: &str, body: Option<&str>) -> Response {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => request
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    create_router(state.clone()).oneshot(request).await.unwrap()
}

async fn json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_status_ok() {
    let state = AppState::new();

    let response = send(&state, "GET", "/status", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(response).await;
    assert!(body["message"].is_string());
    assert_eq!(state.counters().await.status, 1);
}

#[tokio::test]
async fn test_status_override() {
    let state = AppState::new();
    state.update_faults(|f| f.status_code = Some(500)).await;

    let response = send(&state, "GET", "/status", None).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_recording_lifecycle() {
    let state = AppState::new();

    let response = send(&state, "POST", "/start_recording", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.is_recording().await);

    let response = send(&state, "POST", "/stop_recording", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!state.is_recording().await);

    let counters = state.counters().await;
    assert_eq!(counters.start, 1);
    assert_eq!(counters.stop, 1);
}

#[tokio::test]
async fn test_start_rejection() {
    let state = AppState::new();
    state
        .update_faults(|f| f.reject_start = Some((409, "busy".to_string())))
        .await;

    let response = send(&state, "POST", "/start_recording", None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"busy");
    assert!(!state.is_recording().await);
}

#[tokio::test]
async fn test_add_text_then_fetch() {
    let state = AppState::new();

    let response = send(&state, "POST", "/add_test_text", Some(r#"{"text":"hello"}"#)).await;
    assert_eq!(response.status(), StatusCode::OK);
    send(&state, "POST", "/add_test_text", Some(r#"{"text":"you idiot"}"#)).await;

    let response = send(&state, "GET", "/get_transcription", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: TranscriptionResponse = serde_json::from_value(json(response).await).unwrap();
    assert_eq!(body.transcription, "hello you idiot");
    assert_eq!(body.text.as_deref(), Some("you idiot"));
    assert_eq!(body.classification.as_deref(), Some("offensive"));
    assert!(body.timestamp.is_some());
}

#[tokio::test]
async fn test_empty_transcript_omits_optional_fields() {
    let state = AppState::new();

    let response = send(&state, "GET", "/get_transcription", None).await;
    let body = json(response).await;

    assert_eq!(body["transcription"], "");
    assert!(body.get("classification").is_none());
    assert!(body.get("timestamp").is_none());
}

#[tokio::test]
async fn test_failing_fetches_recover() {
    let state = AppState::new();
    state.update_faults(|f| f.fail_next_fetches = 2).await;

    for _ in 0..2 {
        let response = send(&state, "GET", "/get_transcription", None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    let response = send(&state, "GET", "/get_transcription", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let counters = state.counters().await;
    assert_eq!(counters.fetch, 3);
    assert_eq!(counters.fetches_in_flight, 0);
    assert_eq!(counters.max_fetches_in_flight, 1);
}

#[tokio::test]
async fn test_clear_transcription() {
    let state = AppState::new();
    state.append_text("remove this").await;

    let response = send(&state, "POST", "/clear_transcription", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(send(&state, "GET", "/get_transcription", None).await).await;
    assert_eq!(body["transcription"], "");
    assert_eq!(state.counters().await.clear, 1);
}

#[tokio::test]
async fn test_add_text_rejects_bad_body() {
    let state = AppState::new();

    let response = send(&state, "POST", "/add_test_text", Some(r#"{"words":"hello"}"#)).await;
    assert!(response.status().is_client_error());
    assert_eq!(state.counters().await.add_text, 0);
}
