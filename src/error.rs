//! Error taxonomy of the sync client
//!
//! Only `StartError` ever reaches callers. Transient fetch failures and
//! best-effort failures (stop, clear) are logged and recovered locally.

use thiserror::Error;

/// Failure of a single request against the observation server
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("observation server unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: &'static str },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("could not decode {endpoint} response: {reason}")]
    Decode {
        endpoint: &'static str,
        reason: String,
    },
}

impl ApiError {
    pub(crate) fn from_reqwest(endpoint: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout { endpoint }
        } else if err.is_decode() {
            ApiError::Decode {
                endpoint,
                reason: err.to_string(),
            }
        } else {
            ApiError::Unreachable(err)
        }
    }
}

/// Malformed push-channel frame
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed event frame: {0}")]
    Malformed(String),

    #[error("invalid event payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to establish or use a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect push channel: {0}")]
    Connect(String),

    #[error("push channel handshake failed: {0}")]
    Handshake(String),

    #[error("{0} did not connect within the grace period")]
    Timeout(&'static str),

    #[error("transport disconnected")]
    Disconnected,

    #[error("{operation} is not supported by the {transport} transport")]
    Unsupported {
        transport: &'static str,
        operation: &'static str,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Why `start_recording` did not create a session
#[derive(Debug, Error)]
pub enum StartError {
    #[error("a recording session is already active")]
    AlreadyRecording,

    #[error("no transport reached the observation server: {0}")]
    ConnectionFailed(#[source] TransportError),

    #[error("observation server rejected start (HTTP {status}): {message}")]
    ServerRejected { status: u16, message: String },
}
