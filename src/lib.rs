pub mod api;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod transport;

pub use api::ObservationApi;
pub use config::{ClientConfig, Config, PollingConfig, PollingMode, ServerConfig};
pub use error::{ApiError, StartError, TransportError};
pub use http::{create_router, AppState};
pub use session::{
    Classification, ClientSnapshot, ConnectionState, NoopObserver, RecordingSession, SessionStats, SyncEvent,
    TranscriptFragment, TranscriptObserver, TranscriptionSyncClient,
};
pub use transport::{Transport, TransportEvent, TransportKind};
