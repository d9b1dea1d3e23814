use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{Classification, TranscriptFragment};

/// `GET /status` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub message: String,
}

/// `POST /start_recording` body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRecordingResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `GET /get_transcription` body, also the `transcription_update` event payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionResponse {
    /// Complete transcript so far
    #[serde(default)]
    pub transcription: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,

    /// Newly recognised text, when the server reports it separately
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TranscriptionResponse {
    pub fn into_fragment(self) -> TranscriptFragment {
        let classification = Classification::from_label(self.classification.as_deref());
        TranscriptFragment {
            text: self.text.unwrap_or_else(|| self.transcription.clone()),
            classification,
            server_timestamp: self.timestamp.unwrap_or_else(Utc::now),
            full_text: self.transcription,
        }
    }
}

/// `POST /add_test_text` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTextRequest {
    pub text: String,
}

/// `status` event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(default)]
    pub message: String,
}
