use tokio::sync::mpsc;

use super::state::ClientSnapshot;
use super::stats::TranscriptFragment;

/// What the sync client tells its UI
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The transcript changed
    Transcript(TranscriptFragment),
    /// The transcript was cleared
    Cleared,
    /// Connection state, session or transport changed
    State(ClientSnapshot),
    /// A fetch failed; the session continues
    TransientError { message: String },
    /// The transient error window closed
    TransientCleared,
    /// Both reconnect and fallback failed and the session ended
    SessionLost { reason: String },
}

/// Receiver of sync events, supplied by the UI layer
pub trait TranscriptObserver: Send + Sync + 'static {
    fn notify(&self, event: SyncEvent);
}

impl TranscriptObserver for mpsc::UnboundedSender<SyncEvent> {
    fn notify(&self, event: SyncEvent) {
        // A UI that went away is not the client's problem
        let _ = self.send(event);
    }
}

/// Observer that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TranscriptObserver for NoopObserver {
    fn notify(&self, _event: SyncEvent) {}
}
