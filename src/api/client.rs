use reqwest::Response;
use std::time::Duration;
use tracing::debug;

use super::messages::{AddTextRequest, StartRecordingResponse, StatusResponse, TranscriptionResponse};
use crate::config::{ClientConfig, ServerConfig};
use crate::error::ApiError;

/// Typed HTTP client for the observation server
///
/// Every call carries an explicit timeout; nothing here retries.
#[derive(Debug, Clone)]
pub struct ObservationApi {
    http: reqwest::Client,
    base_url: String,
    probe_timeout: Duration,
    request_timeout: Duration,
}

impl ObservationApi {
    pub fn new(server: &ServerConfig, client: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: server.base_url.trim_end_matches('/').to_string(),
            probe_timeout: client.probe_timeout(),
            request_timeout: client.request_timeout(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET /status
    pub async fn status(&self) -> Result<StatusResponse, ApiError> {
        const ENDPOINT: &str = "/status";

        let resp = self
            .http
            .get(self.url(ENDPOINT))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(ENDPOINT, e))?;

        let resp = check_status(ENDPOINT, resp).await?;
        resp.json()
            .await
            .map_err(|e| ApiError::from_reqwest(ENDPOINT, e))
    }

    /// POST /start_recording
    pub async fn start_recording(&self) -> Result<StartRecordingResponse, ApiError> {
        const ENDPOINT: &str = "/start_recording";

        let resp = self.post(ENDPOINT).await?;
        let body = resp
            .text()
            .await
            .map_err(|e| ApiError::from_reqwest(ENDPOINT, e))?;

        // Older servers answer with an empty body
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }

    /// POST /stop_recording
    pub async fn stop_recording(&self) -> Result<(), ApiError> {
        self.post("/stop_recording").await.map(|_| ())
    }

    /// GET /get_transcription
    pub async fn get_transcription(&self) -> Result<TranscriptionResponse, ApiError> {
        const ENDPOINT: &str = "/get_transcription";

        let resp = self
            .http
            .get(self.url(ENDPOINT))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(ENDPOINT, e))?;

        let resp = check_status(ENDPOINT, resp).await?;
        resp.json()
            .await
            .map_err(|e| ApiError::from_reqwest(ENDPOINT, e))
    }

    /// POST /clear_transcription
    pub async fn clear_transcription(&self) -> Result<(), ApiError> {
        self.post("/clear_transcription").await.map(|_| ())
    }

    /// POST /add_test_text
    pub async fn add_test_text(&self, text: &str) -> Result<(), ApiError> {
        const ENDPOINT: &str = "/add_test_text";

        let resp = self
            .http
            .post(self.url(ENDPOINT))
            .timeout(self.request_timeout)
            .json(&AddTextRequest {
                text: text.to_string(),
            })
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(ENDPOINT, e))?;

        check_status(ENDPOINT, resp).await.map(|_| ())
    }

    async fn post(&self, endpoint: &'static str) -> Result<Response, ApiError> {
        let resp = self
            .http
            .post(self.url(endpoint))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(endpoint, e))?;

        check_status(endpoint, resp).await
    }
}

async fn check_status(endpoint: &'static str, resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        debug!("{} -> {}", endpoint, status);
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::Status {
        endpoint,
        status: status.as_u16(),
        body: if body.is_empty() {
            status.canonical_reason().unwrap_or("no body").to_string()
        } else {
            body
        },
    })
}
