use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the stub observation server router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/status", get(handlers::status))
        // Recording control
        .route("/start_recording", post(handlers::start_recording))
        .route("/stop_recording", post(handlers::stop_recording))
        // Transcript
        .route("/get_transcription", get(handlers::get_transcription))
        .route("/clear_transcription", post(handlers::clear_transcription))
        .route("/add_test_text", post(handlers::add_test_text))
        // Push channel
        .route("/ws", get(handlers::socket))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
