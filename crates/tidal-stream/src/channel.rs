// ABOUTME: Connects the tonic Channel that carries one streaming attempt.
// ABOUTME: Normalizes the server target and applies HTTP/2 keep-alive, connect timeout and TLS.

use std::time::Duration;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::error::SessionError;

/// HTTP/2 ping settings for a long-lived stream.
#[derive(Debug, Clone, PartialEq)]
pub struct KeepAliveConfig {
    pub interval: Duration,
    /// How long an unanswered ping is tolerated before the connection drops.
    pub timeout: Duration,
    pub while_idle: bool,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(20),
            while_idle: true,
        }
    }
}

/// Where and how to connect for each attempt.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Server URL, always with a scheme.
    pub address: String,
    /// `None` sends no keep-alive pings.
    pub keep_alive: Option<KeepAliveConfig>,
    pub connect_timeout: Option<Duration>,
    /// Set when the target uses `https://`.
    pub use_tls: bool,
}

impl ChannelConfig {
    /// A bare `host:port` such as `[::1]:50051` becomes `http://[::1]:50051`.
    pub fn new(target: impl Into<String>) -> Self {
        let address = with_scheme(target.into().trim());
        let use_tls = address.to_lowercase().starts_with("https://");
        Self {
            address,
            keep_alive: Some(KeepAliveConfig::default()),
            connect_timeout: Some(Duration::from_secs(30)),
            use_tls,
        }
    }

    pub fn without_keep_alive(mut self) -> Self {
        self.keep_alive = None;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

/// Prefix `http://` when the target has no scheme. Empty stays empty.
fn with_scheme(target: &str) -> String {
    if target.is_empty() || target.contains("://") {
        target.to_string()
    } else {
        format!("http://{target}")
    }
}

/// Connect a fresh channel. A malformed address is `InvalidAddress`; anything
/// that fails while dialing is `Connect`.
pub async fn create_channel(config: &ChannelConfig) -> Result<Channel, SessionError> {
    let mut endpoint = Endpoint::from_shared(config.address.clone())
        .map_err(|e| SessionError::InvalidAddress(e.to_string()))?;

    if config.use_tls {
        endpoint = endpoint
            .tls_config(ClientTlsConfig::new())
            .map_err(|e| SessionError::Connect(format!("TLS config error: {e}")))?;
    }

    if let Some(ka) = &config.keep_alive {
        endpoint = endpoint
            .http2_keep_alive_interval(ka.interval)
            .keep_alive_timeout(ka.timeout)
            .keep_alive_while_idle(ka.while_idle);
    }

    if let Some(timeout) = config.connect_timeout {
        endpoint = endpoint.connect_timeout(timeout);
    }

    let channel = endpoint
        .connect()
        .await
        .map_err(|e| SessionError::Connect(e.to_string()))?;

    tracing::debug!(
        address = %config.address,
        keep_alive = config.keep_alive.is_some(),
        use_tls = config.use_tls,
        "channel connected"
    );

    Ok(channel)
}
