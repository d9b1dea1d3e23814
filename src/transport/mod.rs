//! Transports between the sync client and the observation server
//!
//! Both transports implement [`Transport`] and report everything they see as
//! [`TransportEvent`]s on one inbound channel. The client never installs a
//! callback on a transport.

mod polling;
mod socket;

pub use polling::PollingTransport;
pub use socket::SocketTransport;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::api::ObservationApi;
use crate::config::Config;
use crate::error::TransportError;
use crate::session::TranscriptFragment;

/// Which transport carries a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Persistent WebSocket, server pushes updates
    Socket,
    /// Timer-driven `GET /get_transcription`
    Polling,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Socket => f.write_str("socket"),
            TransportKind::Polling => f.write_str("polling"),
        }
    }
}

/// Something a transport observed
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A transcript update
    Fragment(TranscriptFragment),
    /// Server status message (push channel only)
    Status(String),
    /// One poll or push frame could not be used
    FetchFailed(String),
    /// The transport stopped delivering
    Closed,
    /// The transport hit an I/O error; `Closed` follows
    Error(String),
}

/// Event tagged with the generation of the transport that produced it
#[derive(Debug)]
pub struct Inbound {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Sending half handed to a transport when it opens
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<Inbound>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::Sender<Inbound>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the client has gone away
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Inbound {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }
}

/// Transport contract
///
/// Implementations:
/// - `SocketTransport`: push channel over WebSocket
/// - `PollingTransport`: periodic HTTP fetch
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Name for logging
    fn name(&self) -> &str;

    /// Connect to the server
    ///
    /// Returning `Ok` means the transport reached the connected state.
    async fn open(&mut self, sink: EventSink) -> Result<(), TransportError>;

    /// Send a raw frame to the server
    async fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Start delivering updates for a session
    fn activate(&mut self);

    /// Stop delivering updates and release the connection
    ///
    /// Never waits for an in-flight request.
    async fn close(&mut self);
}

/// Transport factory
pub struct TransportFactory;

impl TransportFactory {
    pub fn create(kind: TransportKind, config: &Config, api: &ObservationApi) -> Box<dyn Transport> {
        match kind {
            TransportKind::Socket => Box::new(SocketTransport::new(
                config.server.socket_url(),
                config.client.handshake_token.clone(),
            )),
            TransportKind::Polling => Box::new(PollingTransport::new(api.clone(), config.polling.interval())),
        }
    }
}
