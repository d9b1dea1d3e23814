use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::retry::RetryPolicy;
use super::stats::{Classification, SessionStats, TranscriptFragment};
use crate::transport::{TransportEvent, TransportKind};

/// Link state between the client and the observation server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(label)
    }
}

/// The recording currently driven by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSession {
    pub id: Uuid,
    pub active: bool,
    pub transport: TransportKind,
    pub started_at: Option<DateTime<Utc>>,
}

/// Soft-error period during which failures are advisory only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransientErrorWindow {
    pub active: bool,
    pub since: Instant,
    pub auto_clear_after: Duration,
}

impl TransientErrorWindow {
    pub fn deadline(&self) -> Instant {
        self.since + self.auto_clear_after
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline()
    }
}

/// Everything a UI needs to render the observation panel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSnapshot {
    pub connection: ConnectionState,
    pub session: Option<RecordingSession>,
    pub full_text: String,
    pub classification: Classification,
    pub transient_error: bool,
    /// Last reachability probe succeeded and no hard error has happened since
    pub probe_ok: bool,
    pub stats: SessionStats,
}

impl ClientSnapshot {
    pub fn is_recording(&self) -> bool {
        self.session.as_ref().map(|s| s.active).unwrap_or(false)
    }

    /// Start controls stay disabled while a connection attempt or session is
    /// in progress, and after a hard error until a probe succeeds
    pub fn can_start(&self) -> bool {
        !self.is_recording()
            && self.connection != ConnectionState::Connecting
            && (self.connection != ConnectionState::Error || self.probe_ok)
    }
}

/// Mutable state of the sync client
///
/// Pure bookkeeping; no I/O happens here.
#[derive(Debug)]
pub struct SyncState {
    connection: ConnectionState,
    session: Option<RecordingSession>,
    full_text: String,
    classification: Classification,
    transient: Option<TransientErrorWindow>,
    transient_window: Duration,
    stats: SessionStats,
    probe_ok: bool,
    /// Generation of the transport whose events are accepted
    generation: Option<u64>,
    /// Generation of a transport still opening; its events wait in `backlog`
    pending: Option<u64>,
    backlog: Vec<TransportEvent>,
    reconnect: RetryPolicy,
}

impl SyncState {
    pub fn new(transient_window: Duration) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            session: None,
            full_text: String::new(),
            classification: Classification::Unknown,
            transient: None,
            transient_window,
            stats: SessionStats::default(),
            probe_ok: false,
            generation: None,
            pending: None,
            backlog: Vec::new(),
            reconnect: RetryPolicy::fixed(0, Duration::ZERO),
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Returns true when the state actually changed
    ///
    /// Entering `Error` invalidates the last successful probe.
    pub fn set_connection(&mut self, connection: ConnectionState) -> bool {
        let changed = self.connection != connection;
        self.connection = connection;
        if connection == ConnectionState::Error {
            self.probe_ok = false;
        }
        changed
    }

    /// Returns true when the recorded probe result changed
    pub fn record_probe(&mut self, reachable: bool) -> bool {
        let changed = self.probe_ok != reachable;
        self.probe_ok = reachable;
        changed
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        self.session.as_ref().map(|s| s.active).unwrap_or(false)
    }

    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn accepts(&self, generation: u64) -> bool {
        self.is_recording() && self.generation == Some(generation)
    }

    /// Generation of the installed transport, while recording
    pub fn accepted_generation(&self) -> Option<u64> {
        self.generation.filter(|_| self.is_recording())
    }

    pub fn set_generation(&mut self, generation: Option<u64>) {
        self.generation = generation;
    }

    /// Hold events of a transport that is still opening
    ///
    /// They are released by `begin_session` or `switch_transport` for the
    /// same generation. Any earlier backlog is discarded.
    pub fn expect_generation(&mut self, generation: u64) {
        self.pending = Some(generation);
        self.backlog.clear();
    }

    /// Forget a transport that never got installed
    pub fn abandon_generation(&mut self, generation: u64) {
        if self.pending == Some(generation) {
            self.pending = None;
            self.backlog.clear();
        }
    }

    /// Queue an event of the pending transport; other generations get the event back
    pub fn hold(&mut self, generation: u64, event: TransportEvent) -> Result<(), TransportEvent> {
        if self.pending == Some(generation) {
            self.backlog.push(event);
            Ok(())
        } else {
            Err(event)
        }
    }

    /// Events that arrived before the accepted transport was installed
    pub fn take_backlog(&mut self) -> Vec<TransportEvent> {
        std::mem::take(&mut self.backlog)
    }

    fn promote(&mut self, generation: u64) {
        if self.pending == Some(generation) {
            self.pending = None;
        } else {
            self.backlog.clear();
        }
        self.generation = Some(generation);
    }

    pub fn reconnect_policy(&mut self) -> &mut RetryPolicy {
        &mut self.reconnect
    }

    pub fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    /// Create the session after a successful start handshake
    ///
    /// Resets the transcript, clears any transient window and marks the
    /// connection as connected.
    pub fn begin_session(
        &mut self,
        transport: TransportKind,
        generation: u64,
        reconnect: RetryPolicy,
    ) -> RecordingSession {
        let started_at = Utc::now();
        let session = RecordingSession {
            id: Uuid::new_v4(),
            active: true,
            transport,
            started_at: Some(started_at),
        };

        self.session = Some(session.clone());
        self.full_text.clear();
        self.classification = Classification::Unknown;
        self.transient = None;
        self.promote(generation);
        self.reconnect = reconnect;
        self.stats = SessionStats {
            started_at: Some(started_at),
            ..SessionStats::default()
        };
        self.connection = ConnectionState::Connected;

        session
    }

    /// Destroy the session; the returned copy has `active == false`
    pub fn end_session(&mut self) -> Option<RecordingSession> {
        let mut session = self.session.take()?;
        session.active = false;

        self.generation = None;
        self.pending = None;
        self.backlog.clear();
        self.transient = None;
        if let Some(started_at) = session.started_at {
            self.stats.duration_secs = seconds_since(started_at);
        }

        Some(session)
    }

    pub fn switch_transport(&mut self, transport: TransportKind, generation: u64) {
        if let Some(session) = self.session.as_mut() {
            session.transport = transport;
        }
        self.promote(generation);
    }

    /// Idempotent replace rule
    ///
    /// A fragment whose `full_text` equals the held transcript changes
    /// nothing. Returns true when the transcript was replaced.
    pub fn apply_fragment(&mut self, fragment: &TranscriptFragment) -> bool {
        self.stats.fragments_received += 1;

        if fragment.full_text == self.full_text {
            self.stats.duplicates_discarded += 1;
            return false;
        }

        self.full_text.clone_from(&fragment.full_text);
        self.classification = fragment.classification;
        self.stats.fragments_applied += 1;
        self.stats.last_update_at = Some(Utc::now());
        true
    }

    pub fn clear_transcript(&mut self) {
        self.full_text.clear();
        self.classification = Classification::Unknown;
    }

    /// Open or refresh the transient window; returns true when a new window opened
    pub fn record_fetch_failure(&mut self, now: Instant) -> bool {
        self.stats.fetch_failures += 1;

        match self.transient.as_mut() {
            Some(window) => {
                window.since = now;
                false
            }
            None => {
                self.transient = Some(TransientErrorWindow {
                    active: true,
                    since: now,
                    auto_clear_after: self.transient_window,
                });
                self.stats.transient_windows_opened += 1;
                true
            }
        }
    }

    /// Close the transient window after a successful fetch; returns true if one was open
    pub fn record_fetch_success(&mut self) -> bool {
        self.transient.take().is_some()
    }

    /// Close the window once its auto-clear delay has passed
    pub fn expire_transient(&mut self, now: Instant) -> bool {
        match self.transient {
            Some(window) if window.is_expired(now) => {
                self.transient = None;
                true
            }
            _ => false,
        }
    }

    pub fn transient_window(&self) -> Option<&TransientErrorWindow> {
        self.transient.as_ref()
    }

    pub fn transient_deadline(&self) -> Option<Instant> {
        self.transient.as_ref().map(TransientErrorWindow::deadline)
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        let mut stats = self.stats.clone();
        if let Some(started_at) = self.session.as_ref().and_then(|s| s.started_at) {
            stats.duration_secs = seconds_since(started_at);
        }

        ClientSnapshot {
            connection: self.connection,
            session: self.session.clone(),
            full_text: self.full_text.clone(),
            classification: self.classification,
            transient_error: self.transient.is_some(),
            probe_ok: self.probe_ok,
            stats,
        }
    }
}

fn seconds_since(started_at: DateTime<Utc>) -> f64 {
    Utc::now().signed_duration_since(started_at).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(full_text: &str) -> TranscriptFragment {
        TranscriptFragment::new(full_text, Classification::Normal)
    }

    fn recording_state() -> SyncState {
        let mut state = SyncState::new(Duration::from_secs(8));
        state.begin_session(TransportKind::Polling, 1, RetryPolicy::fixed(1, Duration::from_secs(3)));
        state
    }

    #[test]
    fn test_replace_rule_notifies_once_per_distinct_text() {
        let mut state = recording_state();

        let applied: Vec<&str> = ["a", "a", "ab"]
            .into_iter()
            .filter(|text| state.apply_fragment(&fragment(text)))
            .collect();

        assert_eq!(applied, vec!["a", "ab"]);
        assert_eq!(state.full_text(), "ab");

        let stats = state.snapshot().stats;
        assert_eq!(stats.fragments_received, 3);
        assert_eq!(stats.fragments_applied, 2);
        assert_eq!(stats.duplicates_discarded, 1);
    }

    #[test]
    fn test_duplicate_does_not_bump_update_time() {
        let mut state = recording_state();
        assert!(state.apply_fragment(&fragment("hello")));
        let first = state.snapshot().stats.last_update_at;

        std::thread::sleep(Duration::from_millis(5));
        assert!(!state.apply_fragment(&fragment("hello")));
        assert_eq!(state.snapshot().stats.last_update_at, first);
    }

    #[test]
    fn test_repeated_runs_of_same_text() {
        let mut state = recording_state();
        let texts = ["x", "x", "x", "xy", "xy", "x", "x"];
        let notified = texts
            .iter()
            .filter(|text| state.apply_fragment(&fragment(text)))
            .count();

        // "x", "xy", then "x" again as a distinct value after "xy"
        assert_eq!(notified, 3);
    }

    #[test]
    fn test_empty_fragment_on_fresh_session_is_a_duplicate() {
        let mut state = recording_state();
        assert!(!state.apply_fragment(&fragment("")));
    }

    #[test]
    fn test_failures_then_success_open_one_window() {
        let mut state = recording_state();
        let start = Instant::now();

        assert!(state.record_fetch_failure(start));
        assert!(!state.record_fetch_failure(start + Duration::from_millis(200)));
        assert!(!state.record_fetch_failure(start + Duration::from_millis(400)));
        assert!(state.transient_window().is_some());

        assert!(state.record_fetch_success());
        assert!(state.transient_window().is_none());

        let stats = state.snapshot().stats;
        assert_eq!(stats.transient_windows_opened, 1);
        assert_eq!(stats.fetch_failures, 3);
    }

    #[test]
    fn test_refresh_moves_deadline() {
        let mut state = recording_state();
        let start = Instant::now();

        state.record_fetch_failure(start);
        state.record_fetch_failure(start + Duration::from_secs(5));

        assert!(!state.expire_transient(start + Duration::from_secs(9)));
        assert!(state.expire_transient(start + Duration::from_secs(13)));
        assert!(state.transient_window().is_none());
    }

    #[test]
    fn test_begin_session_resets_transcript_and_window() {
        let mut state = recording_state();
        state.apply_fragment(&fragment("left over"));
        state.record_fetch_failure(Instant::now());
        state.end_session();

        let session = state.begin_session(TransportKind::Socket, 2, RetryPolicy::fixed(1, Duration::ZERO));

        assert!(session.active);
        assert_eq!(state.full_text(), "");
        assert!(state.transient_window().is_none());
        assert_eq!(state.connection(), ConnectionState::Connected);
        assert!(state.accepts(2));
        assert!(!state.accepts(1));
    }

    #[test]
    fn test_end_session_twice() {
        let mut state = recording_state();
        let ended = state.end_session().unwrap();
        assert!(!ended.active);
        assert!(state.end_session().is_none());
        assert!(!state.accepts(1));
    }

    #[test]
    fn test_switch_transport_keeps_session() {
        let mut state = recording_state();
        let id = state.session().unwrap().id;

        state.switch_transport(TransportKind::Socket, 7);

        let session = state.session().unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.transport, TransportKind::Socket);
        assert!(state.accepts(7));
    }

    #[test]
    fn test_snapshot_can_start() {
        let mut state = SyncState::new(Duration::from_secs(8));
        assert!(state.snapshot().can_start());

        state.set_connection(ConnectionState::Connecting);
        assert!(!state.snapshot().can_start());

        state.begin_session(TransportKind::Polling, 1, RetryPolicy::fixed(1, Duration::ZERO));
        assert!(state.snapshot().is_recording());
        assert!(!state.snapshot().can_start());
    }

    #[test]
    fn test_hard_error_blocks_start_until_probe() {
        let mut state = recording_state();
        assert!(state.record_probe(true));

        state.end_session();
        state.set_connection(ConnectionState::Error);
        assert!(!state.snapshot().probe_ok);
        assert!(!state.snapshot().can_start());

        assert!(!state.record_probe(false));
        assert!(!state.snapshot().can_start());

        assert!(state.record_probe(true));
        assert!(state.snapshot().can_start());
        assert_eq!(state.connection(), ConnectionState::Error);
    }

    #[test]
    fn test_backlog_released_to_started_session() {
        let mut state = SyncState::new(Duration::from_secs(8));
        state.expect_generation(3);

        assert!(!state.accepts(3));
        assert!(state.hold(3, TransportEvent::Closed).is_ok());
        assert_eq!(state.hold(4, TransportEvent::Closed), Err(TransportEvent::Closed));

        state.begin_session(TransportKind::Socket, 3, RetryPolicy::fixed(1, Duration::ZERO));

        assert!(state.accepts(3));
        assert_eq!(state.accepted_generation(), Some(3));
        assert_eq!(state.take_backlog(), vec![TransportEvent::Closed]);
        assert!(state.take_backlog().is_empty());
        assert!(state.hold(3, TransportEvent::Closed).is_err());
    }

    #[test]
    fn test_abandoned_generation_drops_backlog() {
        let mut state = SyncState::new(Duration::from_secs(8));
        state.expect_generation(1);
        state.hold(1, TransportEvent::Status("hello".to_string())).unwrap();

        state.abandon_generation(1);
        assert!(state.hold(1, TransportEvent::Closed).is_err());

        state.expect_generation(2);
        state.begin_session(TransportKind::Polling, 2, RetryPolicy::fixed(1, Duration::ZERO));
        assert!(state.take_backlog().is_empty());
    }

    #[test]
    fn test_backlog_of_other_generation_is_not_released() {
        let mut state = recording_state();
        state.set_generation(None);
        state.expect_generation(5);
        state.hold(5, TransportEvent::Closed).unwrap();

        state.switch_transport(TransportKind::Polling, 6);
        assert!(state.take_backlog().is_empty());
        assert!(state.accepts(6));
    }
}
