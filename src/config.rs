use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub polling: PollingConfig,
    pub stub: StubConfig,
}

/// Where the observation server lives
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP base URL, e.g. `http://localhost:5000`
    pub base_url: String,
    /// Path of the push channel on the same host
    pub socket_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            socket_path: "/ws".to_string(),
        }
    }
}

impl ServerConfig {
    /// Push channel URL derived from the HTTP base URL (`http` -> `ws`, `https` -> `wss`)
    pub fn socket_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };

        if self.socket_path.starts_with('/') {
            format!("{}{}", base, self.socket_path)
        } else {
            format!("{}/{}", base, self.socket_path)
        }
    }
}

/// Timeouts and retry settings of the sync client
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout of the `/status` probe
    pub probe_timeout_ms: u64,
    /// Timeout of every other HTTP request
    pub request_timeout_ms: u64,
    /// How long the push transport gets to connect before falling back
    pub socket_grace_ms: u64,
    /// Auto-clear delay of the transient error window
    pub transient_window_ms: u64,
    /// Delay before reconnecting a dropped push transport
    pub reconnect_delay_ms: u64,
    /// Token sent on the push channel right after it opens
    pub handshake_token: String,
    /// Whether `record` tries the push transport first
    pub prefer_socket: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 3_000,
            request_timeout_ms: 5_000,
            socket_grace_ms: 2_000,
            transient_window_ms: 8_000,
            reconnect_delay_ms: 3_000,
            handshake_token: "40".to_string(),
            prefer_socket: true,
        }
    }
}

impl ClientConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn socket_grace(&self) -> Duration {
        Duration::from_millis(self.socket_grace_ms)
    }

    pub fn transient_window(&self) -> Duration {
        Duration::from_millis(self.transient_window_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Polling cadence of the pull transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollingMode {
    /// 200ms, close to push responsiveness
    Responsive,
    /// 2s, gentler on flaky servers
    Robust,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub mode: PollingMode,
    /// Overrides the mode's interval when set
    pub interval_ms: Option<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            mode: PollingMode::Robust,
            interval_ms: None,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        match (self.interval_ms, self.mode) {
            (Some(ms), _) => Duration::from_millis(ms.max(1)),
            (None, PollingMode::Responsive) => Duration::from_millis(200),
            (None, PollingMode::Robust) => Duration::from_millis(2_000),
        }
    }
}

/// Bind address of the stub observation server
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StubConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

impl Config {
    /// Load configuration from an optional file plus `OBSERVATION_SYNC__*` environment variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("OBSERVATION_SYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.client.probe_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.client.socket_grace(), Duration::from_secs(2));
        assert_eq!(cfg.client.transient_window(), Duration::from_secs(8));
        assert_eq!(cfg.client.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(cfg.polling.interval(), Duration::from_millis(2_000));
    }

    #[test]
    fn test_polling_interval_override() {
        let responsive = PollingConfig {
            mode: PollingMode::Responsive,
            interval_ms: None,
        };
        assert_eq!(responsive.interval(), Duration::from_millis(200));

        let custom = PollingConfig {
            mode: PollingMode::Responsive,
            interval_ms: Some(50),
        };
        assert_eq!(custom.interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_socket_url() {
        let server = ServerConfig {
            base_url: "http://127.0.0.1:5000/".to_string(),
            socket_path: "/ws".to_string(),
        };
        assert_eq!(server.socket_url(), "ws://127.0.0.1:5000/ws");

        let secure = ServerConfig {
            base_url: "https://observe.school.example".to_string(),
            socket_path: "socket".to_string(),
        };
        assert_eq!(secure.socket_url(), "wss://observe.school.example/socket");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observation-sync.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[server]
base_url = "http://10.0.0.5:8080"

[polling]
mode = "responsive"

[client]
socket_grace_ms = 500
"#
        )
        .unwrap();

        let stem = dir.path().join("observation-sync");
        let cfg = Config::load(stem.to_str().unwrap()).unwrap();
        assert_eq!(cfg.server.base_url, "http://10.0.0.5:8080");
        assert_eq!(cfg.server.socket_path, "/ws");
        assert_eq!(cfg.polling.mode, PollingMode::Responsive);
        assert_eq!(cfg.client.socket_grace(), Duration::from_millis(500));
        assert_eq!(cfg.client.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("does-not-exist");
        let cfg = Config::load(stem.to_str().unwrap()).unwrap();
        assert_eq!(cfg.server.base_url, "http://localhost:5000");
    }
}
