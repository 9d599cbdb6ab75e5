// ABOUTME: Session and reconnection settings, plus server target resolution.
// ABOUTME: Defaults mirror the reference server: [::1]:50051, 500ms write poll, 50 retries.

use std::time::Duration;

use crate::error::ConfigError;
use crate::reliability::ReliabilityConfig;
use crate::stream::DEFAULT_CHANNEL_BUFFER;

/// Environment variable that overrides the default server target.
pub const SERVER_ADDRESS_ENV: &str = "GRPC_SERVER_ADDRESS";

/// Target used when neither an explicit address nor the override is set.
pub const DEFAULT_SERVER_ADDRESS: &str = "[::1]:50051";

/// Default bounded wait of the write loop before it rechecks for completion.
pub const DEFAULT_WRITE_POLL: Duration = Duration::from_millis(500);

/// Pick the server target: explicit argument, then the environment override,
/// then [`DEFAULT_SERVER_ADDRESS`]. Blank values count as unset.
pub fn resolve_target(explicit: Option<&str>, env_override: Option<&str>) -> String {
    [explicit, env_override]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SERVER_ADDRESS)
        .to_string()
}

/// [`resolve_target`] reading the override from [`SERVER_ADDRESS_ENV`].
pub fn resolve_target_from_env(explicit: Option<&str>) -> String {
    let env_override = std::env::var(SERVER_ADDRESS_ENV).ok();
    resolve_target(explicit, env_override.as_deref())
}

/// Which semantics a session applies to inbound data.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionMode {
    /// Count messages only; never acknowledge.
    #[default]
    Plain,
    /// Acknowledge with simulated loss.
    Reliable(ReliabilityConfig),
}

/// Settings for one duplex stream session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub mode: SessionMode,
    /// Cancel the session on the first message at or after this delay.
    pub auto_cancel_delay: Option<Duration>,
    /// Bounded wait of the write loop on an empty queue.
    pub write_poll: Duration,
    /// Capacity of the ack queue and of the outbound stream.
    pub channel_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Plain,
            auto_cancel_delay: None,
            write_poll: DEFAULT_WRITE_POLL,
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
        }
    }
}

impl SessionConfig {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn reliable(reliability: ReliabilityConfig) -> Self {
        Self {
            mode: SessionMode::Reliable(reliability),
            ..Self::default()
        }
    }

    pub fn with_auto_cancel(mut self, delay: Duration) -> Self {
        self.auto_cancel_delay = Some(delay);
        self
    }

    /// Same as [`with_auto_cancel`](Self::with_auto_cancel), from fractional seconds.
    pub fn with_auto_cancel_secs(self, secs: f64) -> Result<Self, ConfigError> {
        let delay =
            Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::AutoCancelDelay(secs))?;
        Ok(self.with_auto_cancel(delay))
    }

    pub fn with_write_poll(mut self, poll: Duration) -> Self {
        self.write_poll = poll;
        self
    }

    pub fn with_channel_buffer(mut self, size: usize) -> Self {
        self.channel_buffer = size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.write_poll.is_zero() {
            return Err(ConfigError::Zero("write poll interval"));
        }
        if self.channel_buffer == 0 {
            return Err(ConfigError::Zero("channel buffer"));
        }
        if let SessionMode::Reliable(reliability) = &self.mode {
            reliability.validate()?;
        }
        Ok(())
    }
}

/// Retry, backoff and cooldown settings of the reconnection controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Attempts allowed in one run, counting the first.
    pub max_retries: u32,
    /// Delay after UNAVAILABLE or DEADLINE_EXCEEDED.
    pub transport_backoff: Duration,
    /// Delay after any other recoverable failure.
    pub other_backoff: Duration,
    /// Consecutive failures that trigger a cooldown.
    pub cooldown_threshold: u32,
    pub cooldown: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 50,
            transport_backoff: Duration::from_secs(1),
            other_backoff: Duration::from_secs(2),
            cooldown_threshold: 5,
            cooldown: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Zero("max retries"));
        }
        if self.cooldown_threshold == 0 {
            return Err(ConfigError::Zero("cooldown threshold"));
        }
        Ok(())
    }
}
