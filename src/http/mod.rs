//! Stub observation server
//!
//! Speaks the same contract as the real observation server so the client
//! can be exercised end to end without audio or a recognition model:
//! - GET /status - Health probe
//! - POST /start_recording, POST /stop_recording - Recording control
//! - GET /get_transcription - Current transcript
//! - POST /clear_transcription - Reset transcript
//! - POST /add_test_text - Append text as if it had been recognised
//! - GET /ws - Push channel
//!
//! Faults (status override, failing fetches, rejected starts, stalled
//! sockets) are set through `AppState`.

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, Faults, PushMessage, RequestCounters, ServerState, SocketMode};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

/// Serve the stub on an already bound listener until the task is dropped
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!("Stub observation server listening on {}", addr);

    axum::serve(listener, create_router(state))
        .await
        .context("Stub observation server failed")
}
