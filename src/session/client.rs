use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::driver;
use super::observer::{SyncEvent, TranscriptObserver};
use super::retry::RetryPolicy;
use super::state::{ClientSnapshot, ConnectionState, RecordingSession, SyncState};
use super::stats::TranscriptFragment;
use crate::api::ObservationApi;
use crate::config::Config;
use crate::error::{ApiError, StartError, TransportError};
use crate::transport::{EventSink, Inbound, Transport, TransportFactory, TransportKind};

const INBOUND_CAPACITY: usize = 100;

/// Push reconnects allowed per session before falling back to polling
const RECONNECT_ATTEMPTS: u32 = 1;

/// Live link between an observation view and the observation server
///
/// Owns the recording lifecycle, picks a transport and delivers
/// deduplicated transcript updates to the registered observer. Must be
/// created inside a tokio runtime; a background task consumes transport
/// events until the client is disposed or dropped.
pub struct TranscriptionSyncClient {
    shared: Arc<Shared>,
    driver: Option<JoinHandle<()>>,
}

/// State reachable from both the caller and the driver task
///
/// Lock order: `transport` before `state` whenever both are held.
pub(super) struct Shared {
    pub(super) config: Config,
    pub(super) api: ObservationApi,
    pub(super) state: Mutex<SyncState>,
    pub(super) transport: Mutex<Option<Box<dyn Transport>>>,
    observer: Box<dyn TranscriptObserver>,
    inbound_tx: mpsc::Sender<Inbound>,
    next_generation: AtomicU64,
    /// Wakes the driver to replay events held while a transport was opening
    pub(super) backlog_ready: Notify,
}

impl TranscriptionSyncClient {
    pub fn new(config: Config, observer: impl TranscriptObserver) -> Self {
        let api = ObservationApi::new(&config.server, &config.client);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        let shared = Arc::new(Shared {
            state: Mutex::new(SyncState::new(config.client.transient_window())),
            transport: Mutex::new(None),
            observer: Box::new(observer),
            inbound_tx,
            next_generation: AtomicU64::new(0),
            backlog_ready: Notify::new(),
            config,
            api,
        });

        let driver = tokio::spawn(driver::run(Arc::clone(&shared), inbound_rx));

        Self {
            shared,
            driver: Some(driver),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Probe `GET /status`; false on any failure, non-2xx or timeout
    ///
    /// The result is kept in the snapshot: after a hard error, starting is
    /// offered again only once a probe succeeds.
    pub async fn check_server_reachable(&self) -> bool {
        let reachable = match self.shared.api.status().await {
            Ok(status) => {
                debug!("Observation server reachable: {}", status.message);
                true
            }
            Err(e) => {
                debug!("Observation server unreachable: {}", e);
                false
            }
        };

        let changed = self.shared.state.lock().await.record_probe(reachable);
        if changed {
            self.shared.notify_state().await;
        }
        reachable
    }

    /// Connect a transport and start a recording on the server
    pub async fn start_recording(&mut self, prefer_socket: bool) -> Result<RecordingSession, StartError> {
        if self.shared.state.lock().await.is_recording() {
            warn!("Recording already started");
            return Err(StartError::AlreadyRecording);
        }

        self.shared.set_connection(ConnectionState::Connecting).await;

        let (mut transport, generation) = match self.shared.establish(prefer_socket).await {
            Ok(connected) => connected,
            Err(e) => {
                error!("Failed to connect to observation server: {}", e);
                self.shared.set_connection(ConnectionState::Error).await;
                return Err(StartError::ConnectionFailed(e));
            }
        };

        match self.shared.api.start_recording().await {
            Ok(resp) => info!(
                "Observation server accepted start: {}",
                resp.message.as_deref().unwrap_or("ok")
            ),
            Err(e) => {
                error!("Start recording handshake failed: {}", e);
                self.shared.state.lock().await.abandon_generation(generation);
                transport.close().await;
                self.shared.set_connection(ConnectionState::Error).await;

                return Err(match e {
                    ApiError::Status { status, body, .. } => StartError::ServerRejected { status, message: body },
                    other => StartError::ConnectionFailed(TransportError::Api(other)),
                });
            }
        }

        let reconnect = RetryPolicy::fixed(RECONNECT_ATTEMPTS, self.shared.config.client.reconnect_delay());

        let session = {
            let mut slot = self.shared.transport.lock().await;
            let mut state = self.shared.state.lock().await;
            let session = state.begin_session(transport.kind(), generation, reconnect);
            transport.activate();
            *slot = Some(transport);
            session
        };
        self.shared.backlog_ready.notify_one();

        info!(
            "Recording session {} started over {} transport",
            session.id, session.transport
        );
        self.shared.notify_state().await;

        Ok(session)
    }

    /// End the current recording
    ///
    /// Local state is cleared before any network call, so this always
    /// succeeds. Stopping is a hard transition: the connection ends in
    /// `Error` and a new start is offered after the next successful probe.
    /// Calling it without a session does nothing.
    pub async fn stop_recording(&mut self) {
        let (transport, session) = {
            let mut slot = self.shared.transport.lock().await;
            let mut state = self.shared.state.lock().await;
            let Some(session) = state.end_session() else {
                debug!("Recording not active");
                return;
            };
            state.set_connection(ConnectionState::Error);
            (slot.take(), session)
        };

        info!("Stopping recording session: {}", session.id);

        if let Some(mut transport) = transport {
            transport.close().await;
        }
        self.shared.notify_state().await;

        if let Err(e) = self.shared.api.stop_recording().await {
            warn!("Stop handshake failed, session already closed locally: {}", e);
        }

        if session.transport == TransportKind::Polling {
            match self.shared.api.get_transcription().await {
                Ok(resp) => self.shared.submit_transcript_update(resp.into_fragment()).await,
                Err(e) => warn!("Final transcript fetch failed: {}", e),
            }
        }

        info!("Recording session {} stopped", session.id);
    }

    /// Apply a fragment with the idempotent replace rule
    ///
    /// Transports feed this automatically; hosts with their own update
    /// channel can call it directly.
    pub async fn submit_transcript_update(&self, fragment: TranscriptFragment) {
        self.shared.submit_transcript_update(fragment).await;
    }

    /// Ask the server to clear its transcript and reset the local one
    pub async fn clear_transcript(&self) {
        if let Err(e) = self.shared.api.clear_transcription().await {
            warn!("Failed to clear server transcript: {}", e);
        }

        self.shared.state.lock().await.clear_transcript();
        self.shared.observer.notify(SyncEvent::Cleared);
    }

    /// Push text into the server's transcript (debug helper)
    pub async fn inject_test_text(&self, text: &str) -> bool {
        match self.shared.api.add_test_text(text).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to add test text: {}", e);
                false
            }
        }
    }

    pub async fn snapshot(&self) -> ClientSnapshot {
        self.shared.state.lock().await.snapshot()
    }

    /// Stop any recording and shut the background driver down
    pub async fn dispose(mut self) {
        self.stop_recording().await;
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

impl Drop for TranscriptionSyncClient {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

impl Shared {
    pub(super) async fn set_connection(&self, connection: ConnectionState) {
        let changed = self.state.lock().await.set_connection(connection);
        if changed {
            self.notify_state().await;
        }
    }

    pub(super) async fn notify_state(&self) {
        let snapshot = self.state.lock().await.snapshot();
        self.observer.notify(SyncEvent::State(snapshot));
    }

    pub(super) fn notify(&self, event: SyncEvent) {
        self.observer.notify(event);
    }

    pub(super) async fn submit_transcript_update(&self, fragment: TranscriptFragment) {
        let (window_closed, applied) = {
            let mut state = self.state.lock().await;
            (state.record_fetch_success(), state.apply_fragment(&fragment))
        };

        if window_closed {
            info!("Transient error window closed by successful fetch");
            self.observer.notify(SyncEvent::TransientCleared);
        }
        if applied {
            self.observer.notify(SyncEvent::Transcript(fragment));
        }
    }

    /// Socket first when preferred, polling at most once as fallback
    async fn establish(&self, prefer_socket: bool) -> Result<(Box<dyn Transport>, u64), TransportError> {
        if prefer_socket {
            match self.connect(TransportKind::Socket).await {
                Ok(connected) => return Ok(connected),
                Err(e) => warn!("Push transport unavailable ({}), falling back to polling", e),
            }
        }

        self.connect(TransportKind::Polling).await
    }

    /// Open one transport under a fresh generation
    ///
    /// Events the transport reports before it is installed are held back
    /// and replayed once the session takes it over.
    pub(super) async fn connect(&self, kind: TransportKind) -> Result<(Box<dyn Transport>, u64), TransportError> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let sink = EventSink::new(generation, self.inbound_tx.clone());
        let mut transport = TransportFactory::create(kind, &self.config, &self.api);
        self.state.lock().await.expect_generation(generation);

        let opened = match kind {
            TransportKind::Socket => {
                tokio::time::timeout(self.config.client.socket_grace(), transport.open(sink))
                    .await
                    .unwrap_or(Err(TransportError::Timeout("push transport")))
            }
            TransportKind::Polling => transport.open(sink).await,
        };

        match opened {
            Ok(()) => {
                debug!("Opened {} transport (generation {})", transport.name(), generation);
                Ok((transport, generation))
            }
            Err(e) => {
                debug!("Failed to open {} transport: {}", transport.name(), e);
                self.state.lock().await.abandon_generation(generation);
                transport.close().await;
                Err(e)
            }
        }
    }
}
