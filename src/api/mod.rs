//! Wire contract of the observation server
//!
//! - `client`: typed HTTP calls (`/status`, `/start_recording`, ...)
//! - `messages`: JSON bodies shared by the HTTP and push channels
//! - `protocol`: push channel frame codec

pub mod client;
pub mod messages;
pub mod protocol;

pub use client::ObservationApi;
pub use messages::{AddTextRequest, StartRecordingResponse, StatusEvent, StatusResponse, TranscriptionResponse};
pub use protocol::Frame;
