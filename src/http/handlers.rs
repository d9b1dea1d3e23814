use super::state::{AppState, PushMessage, SocketMode};
use crate::api::messages::{AddTextRequest, StartRecordingResponse, StatusEvent, StatusResponse};
use crate::api::protocol::{self, Frame, EVENT_STATUS};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn status_code(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

// ============================================================================
// HTTP endpoints
// ============================================================================

/// GET /status
pub async fn status(State(state): State<AppState>) -> Response {
    let override_code = {
        let mut inner = state.inner.write().await;
        inner.counters.status += 1;
        inner.faults.status_code
    };

    match override_code {
        Some(code) => (
            status_code(code),
            Json(ErrorResponse {
                error: "observation server unavailable".to_string(),
            }),
        )
            .into_response(),
        None => (
            StatusCode::OK,
            Json(StatusResponse {
                message: "Observation server running".to_string(),
            }),
        )
            .into_response(),
    }
}

/// POST /start_recording
pub async fn start_recording(State(state): State<AppState>) -> Response {
    let delay = {
        let mut inner = state.inner.write().await;
        inner.counters.start += 1;
        inner.faults.start_delay_ms
    };

    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let mut inner = state.inner.write().await;

    if let Some((code, message)) = inner.faults.reject_start.clone() {
        warn!("Rejecting start_recording with {}", code);
        return (status_code(code), message).into_response();
    }

    inner.recording = true;
    info!("Recording started");

    (
        StatusCode::OK,
        Json(StartRecordingResponse {
            message: Some("Recording started".to_string()),
        }),
    )
        .into_response()
}

/// POST /stop_recording
pub async fn stop_recording(State(state): State<AppState>) -> impl IntoResponse {
    let mut inner = state.inner.write().await;
    inner.counters.stop += 1;
    inner.recording = false;
    info!("Recording stopped");

    (
        StatusCode::OK,
        Json(MessageResponse {
            message: "Recording stopped".to_string(),
        }),
    )
}

/// GET /get_transcription
pub async fn get_transcription(State(state): State<AppState>) -> Response {
    let delay = {
        let mut inner = state.inner.write().await;
        inner.counters.fetch += 1;
        inner.counters.fetches_in_flight += 1;
        inner.counters.max_fetches_in_flight = inner
            .counters
            .max_fetches_in_flight
            .max(inner.counters.fetches_in_flight);
        inner.faults.fetch_delay_ms
    };

    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let mut inner = state.inner.write().await;
    inner.counters.fetches_in_flight -= 1;

    if inner.faults.fail_next_fetches > 0 {
        inner.faults.fail_next_fetches -= 1;
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "transcription temporarily unavailable".to_string(),
            }),
        )
            .into_response();
    }

    (StatusCode::OK, Json(inner.transcription())).into_response()
}

/// POST /clear_transcription
pub async fn clear_transcription(State(state): State<AppState>) -> impl IntoResponse {
    state.inner.write().await.counters.clear += 1;
    state.clear().await;

    Json(MessageResponse {
        message: "Transcription cleared".to_string(),
    })
}

/// POST /add_test_text
pub async fn add_test_text(State(state): State<AppState>, Json(req): Json<AddTextRequest>) -> impl IntoResponse {
    state.inner.write().await.counters.add_text += 1;
    let update = state.append_text(&req.text).await;
    Json(update)
}

// ============================================================================
// Push channel
// ============================================================================

/// GET /ws
pub async fn socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let mode = state.inner.read().await.faults.socket_mode;

    match mode {
        SocketMode::Accept => ws.on_upgrade(move |socket| handle_socket(socket, state)),
        SocketMode::Reject => (StatusCode::SERVICE_UNAVAILABLE, "push channel disabled").into_response(),
        SocketMode::Stall => {
            std::future::pending::<()>().await;
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let mut updates = state.push.subscribe();
    state.inner.write().await.counters.socket_connects += 1;
    info!("Push client connected");

    let (mut sender, mut receiver) = socket.split();
    let mut joined = false;

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("Push client read failed: {}", e);
                        break;
                    }
                };

                let replies = match protocol::decode(&text) {
                    Ok(Frame::Connect) => {
                        joined = true;
                        let status = StatusEvent {
                            message: "connected".to_string(),
                        };
                        let mut replies = vec![Frame::Connect.encode()];
                        if let Ok(frame) = Frame::event(EVENT_STATUS, &status) {
                            replies.push(frame.encode());
                        }
                        replies
                    }
                    Ok(Frame::Ping) => vec![Frame::Pong.encode()],
                    Ok(Frame::Disconnect) => break,
                    Ok(other) => {
                        debug!("Ignoring client frame {:?}", other);
                        Vec::new()
                    }
                    Err(e) => {
                        debug!("Undecodable client frame: {}", e);
                        Vec::new()
                    }
                };

                for reply in replies {
                    if sender.send(Message::Text(reply)).await.is_err() {
                        return;
                    }
                }
            }
            push = updates.recv() => match push {
                Ok(PushMessage::Frame(frame)) if joined => {
                    if sender.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Ok(PushMessage::Frame(_)) => {}
                Ok(PushMessage::Drop) => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                Err(RecvError::Lagged(skipped)) => debug!("Push client lagged by {} updates", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Push client disconnected");
}
