// ABOUTME: Optional TOML configuration file for tidal-client.
// ABOUTME: Loads ~/.config/tidal/client.toml or an explicit path; every field has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tidal_stream::{ReconnectPolicy, DEFAULT_DROP_PROBABILITY};
use tracing::debug;

/// Top-level configuration file structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub channel: ChannelSection,
}

/// `[reconnect]`: retry budget, backoff and cooldown.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectSection {
    pub max_retries: u32,
    pub transport_backoff_ms: u64,
    pub other_backoff_ms: u64,
    pub cooldown_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            max_retries: policy.max_retries,
            transport_backoff_ms: policy.transport_backoff.as_millis() as u64,
            other_backoff_ms: policy.other_backoff.as_millis() as u64,
            cooldown_threshold: policy.cooldown_threshold,
            cooldown_ms: policy.cooldown.as_millis() as u64,
        }
    }
}

impl ReconnectSection {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_retries: self.max_retries,
            transport_backoff: Duration::from_millis(self.transport_backoff_ms),
            other_backoff: Duration::from_millis(self.other_backoff_ms),
            cooldown_threshold: self.cooldown_threshold,
            cooldown: Duration::from_millis(self.cooldown_ms),
        }
    }
}

/// `[session]`: per-attempt stream settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    pub drop_probability: f64,
    pub write_poll_ms: u64,
    pub channel_buffer: usize,
    pub seed: Option<u64>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            drop_probability: DEFAULT_DROP_PROBABILITY,
            write_poll_ms: tidal_stream::DEFAULT_WRITE_POLL.as_millis() as u64,
            channel_buffer: 100,
            seed: None,
        }
    }
}

/// `[channel]`: connection settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelSection {
    pub connect_timeout_ms: u64,
    pub keep_alive: bool,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            keep_alive: true,
        }
    }
}

/// Get XDG-style config directory (~/.config/tidal)
/// Respects XDG_CONFIG_HOME if set, otherwise uses ~/.config
fn xdg_config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("tidal"))
}

/// Get default config path (~/.config/tidal/client.toml)
pub fn default_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|p| p.join("client.toml"))
}

impl ClientConfig {
    /// Load from `path`, or from the default location when `path` is None.
    ///
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => {
                    debug!("no client config file, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("invalid config in {}", path.display()))?;
        debug!(path = %path.display(), "loaded client config");
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(contents).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let p = self.session.drop_probability;
        if !(0.0..=1.0).contains(&p) {
            bail!("session.drop_probability must be within [0, 1], got {p}");
        }
        if self.session.write_poll_ms == 0 {
            bail!("session.write_poll_ms must be greater than zero");
        }
        if self.session.channel_buffer == 0 {
            bail!("session.channel_buffer must be greater than zero");
        }
        self.reconnect.policy().validate()?;
        Ok(())
    }
}
