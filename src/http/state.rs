use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::api::messages::TranscriptionResponse;
use crate::api::protocol::{Frame, EVENT_TRANSCRIPTION_UPDATE};

const PUSH_CAPACITY: usize = 64;

/// Words the stub flags as offensive
const OFFENSIVE_WORDS: &[&str] = &["stupid", "idiot", "dumb", "hate", "shut up", "loser"];

/// How the push endpoint answers upgrade requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketMode {
    #[default]
    Accept,
    /// Answer 503 instead of upgrading
    Reject,
    /// Never answer
    Stall,
}

/// Deterministic failures for exercising the client
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// `/status` answers with this code instead of 200
    pub status_code: Option<u16>,
    /// Number of upcoming `/get_transcription` calls that answer 503
    pub fail_next_fetches: u32,
    /// `/start_recording` answers with this code and body
    pub reject_start: Option<(u16, String)>,
    /// Delay added to every `/get_transcription`
    pub fetch_delay_ms: u64,
    /// Delay before `/start_recording` answers
    pub start_delay_ms: u64,
    pub socket_mode: SocketMode,
}

/// Request counters, for assertions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCounters {
    pub status: usize,
    pub start: usize,
    pub stop: usize,
    pub fetch: usize,
    pub clear: usize,
    pub add_text: usize,
    pub socket_connects: usize,
    pub fetches_in_flight: usize,
    pub max_fetches_in_flight: usize,
}

#[derive(Debug, Default)]
pub struct ServerState {
    pub recording: bool,
    pub transcript: String,
    pub last_text: Option<String>,
    pub classification: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub faults: Faults,
    pub counters: RequestCounters,
}

impl ServerState {
    pub fn transcription(&self) -> TranscriptionResponse {
        TranscriptionResponse {
            transcription: self.transcript.clone(),
            classification: self.classification.clone(),
            text: self.last_text.clone(),
            timestamp: self.updated_at,
        }
    }
}

/// Message fanned out to connected push clients
#[derive(Debug, Clone)]
pub enum PushMessage {
    Frame(String),
    /// Close every push connection
    Drop,
}

/// Shared state of the stub observation server
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<RwLock<ServerState>>,
    pub push: broadcast::Sender<PushMessage>,
}

impl AppState {
    pub fn new() -> Self {
        let (push, _) = broadcast::channel(PUSH_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(ServerState::default())),
            push,
        }
    }

    /// Append recognised text and push the update to socket clients
    pub async fn append_text(&self, text: &str) -> TranscriptionResponse {
        let update = {
            let mut state = self.inner.write().await;
            let text = text.trim();
            if !state.transcript.is_empty() && !text.is_empty() {
                state.transcript.push(' ');
            }
            state.transcript.push_str(text);
            state.last_text = Some(text.to_string());
            state.classification = Some(classify(&state.transcript).to_string());
            state.updated_at = Some(Utc::now());
            state.transcription()
        };

        self.broadcast_update(&update);
        update
    }

    pub async fn clear(&self) {
        let update = {
            let mut state = self.inner.write().await;
            state.transcript.clear();
            state.last_text = None;
            state.classification = None;
            state.updated_at = Some(Utc::now());
            state.transcription()
        };

        self.broadcast_update(&update);
    }

    pub async fn update_faults(&self, f: impl FnOnce(&mut Faults)) {
        f(&mut self.inner.write().await.faults);
    }

    pub async fn counters(&self) -> RequestCounters {
        self.inner.read().await.counters.clone()
    }

    pub async fn is_recording(&self) -> bool {
        self.inner.read().await.recording
    }

    /// Close every open push connection
    pub fn drop_sockets(&self) {
        let _ = self.push.send(PushMessage::Drop);
    }

    fn broadcast_update(&self, update: &TranscriptionResponse) {
        if let Ok(frame) = Frame::event(EVENT_TRANSCRIPTION_UPDATE, update) {
            // No subscribers just means nobody is connected
            let _ = self.push.send(PushMessage::Frame(frame.encode()));
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(transcript: &str) -> &'static str {
    let lowered = transcript.to_lowercase();
    if OFFENSIVE_WORDS.iter().any(|w| lowered.contains(w)) {
        "offensive"
    } else {
        "normal"
    }
}
