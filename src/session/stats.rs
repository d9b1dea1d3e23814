use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content classification attached to a transcript by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Normal,
    Offensive,
    #[default]
    Unknown,
}

impl Classification {
    /// Parse the server's label; absent or unrecognised labels are `Unknown`
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
            Some("normal") | Some("clean") | Some("neutral") | Some("not_offensive") => {
                Classification::Normal
            }
            Some("offensive") | Some("hate") | Some("toxic") => Classification::Offensive,
            _ => Classification::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Normal => "normal",
            Classification::Offensive => "offensive",
            Classification::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transcript update from either transport
///
/// Carries the complete transcript so far. A fragment replaces whatever the
/// client currently shows when its `full_text` differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptFragment {
    /// Incremental text as reported by the server
    pub text: String,

    /// Content classification of the transcript
    pub classification: Classification,

    /// Server timestamp, or receipt time when the server sent none
    pub server_timestamp: DateTime<Utc>,

    /// Complete transcript so far
    pub full_text: String,
}

impl TranscriptFragment {
    pub fn new(full_text: impl Into<String>, classification: Classification) -> Self {
        let full_text = full_text.into();
        Self {
            text: full_text.clone(),
            classification,
            server_timestamp: Utc::now(),
            full_text,
        }
    }
}

/// Statistics about a recording session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// When the recording started
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since start (0 when no session has run)
    pub duration_secs: f64,

    /// Fragments delivered by any transport
    pub fragments_received: usize,

    /// Fragments that changed the transcript
    pub fragments_applied: usize,

    /// Fragments discarded because the transcript was unchanged
    pub duplicates_discarded: usize,

    /// When the last applied fragment arrived
    pub last_update_at: Option<DateTime<Utc>>,

    /// Failed polls or undecodable push frames
    pub fetch_failures: usize,

    /// Transient error windows opened (refreshes not counted)
    pub transient_windows_opened: usize,

    /// Push channel reconnect attempts
    pub reconnect_attempts: usize,

    /// Switches from push to pull transport
    pub transport_fallbacks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_labels() {
        assert_eq!(Classification::from_label(Some("normal")), Classification::Normal);
        assert_eq!(Classification::from_label(Some("Offensive")), Classification::Offensive);
        assert_eq!(Classification::from_label(Some(" hate ")), Classification::Offensive);
        assert_eq!(Classification::from_label(Some("sarcastic")), Classification::Unknown);
        assert_eq!(Classification::from_label(None), Classification::Unknown);
    }

    #[test]
    fn test_fragment_text_defaults_to_full_text() {
        let fragment = TranscriptFragment::new("good morning class", Classification::Normal);
        assert_eq!(fragment.text, "good morning class");
        assert_eq!(fragment.full_text, "good morning class");
    }
}
