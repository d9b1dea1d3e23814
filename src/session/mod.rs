//! Transcription sync client
//!
//! This module provides the `TranscriptionSyncClient` that manages:
//! - Recording start/stop handshakes with the observation server
//! - Transport choice (push channel first, polling as fallback)
//! - Deduplicated transcript delivery to a UI observer
//! - Transient error windows and push-channel recovery
//! - Session statistics and connection state

mod client;
mod driver;
mod observer;
mod retry;
mod state;
mod stats;

pub use client::TranscriptionSyncClient;
pub use observer::{NoopObserver, SyncEvent, TranscriptObserver};
pub use retry::RetryPolicy;
pub use state::{ClientSnapshot, ConnectionState, RecordingSession, SyncState, TransientErrorWindow};
pub use stats::{Classification, SessionStats, TranscriptFragment};
