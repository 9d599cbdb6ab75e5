// ABOUTME: Mode selection and execution for tidal-client.
// ABOUTME: Merges CLI overrides with the config file, then runs one session or the reconnection controller.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tidal_stream::{
    resolve_target_from_env, run_attempt, ChannelConfig, ReconnectController, ReconnectPolicy,
    ReliabilityConfig, RunSummary, SessionConfig, SessionMode, SessionReport, StreamTransport,
    Wire,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ClientConfig;

/// Which client behavior to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One plain session cancelled by the auto-cancel trigger.
    AutoCancel,
    /// Plain sessions under the reconnection controller.
    Simple,
    /// Acknowledging sessions under the reconnection controller.
    Reliable,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::AutoCancel => "auto_cancel",
            Mode::Simple => "simple",
            Mode::Reliable => "reliable",
        }
    }

    /// The schema of the server each mode was written against: the cancel
    /// server frames bare data messages, the ack server wraps them in envelopes.
    pub fn default_wire(&self) -> Wire {
        match self {
            Mode::AutoCancel | Mode::Simple => Wire::Framed,
            Mode::Reliable => Wire::Envelope,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto_cancel" => Ok(Mode::AutoCancel),
            "simple" => Ok(Mode::Simple),
            "reliable" => Ok(Mode::Reliable),
            other => Err(anyhow!(
                "unknown mode '{other}', expected auto_cancel, simple or reliable"
            )),
        }
    }
}

/// Values given on the command line. `None` defers to the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub server: Option<String>,
    pub delay_secs: f64,
    pub drop_probability: Option<f64>,
    pub seed: Option<u64>,
    pub max_retries: Option<u32>,
    pub wire: Option<Wire>,
}

/// Everything a run needs, resolved and validated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: Mode,
    pub target: String,
    pub wire: Wire,
    pub channel: ChannelConfig,
    pub session: SessionConfig,
    pub policy: ReconnectPolicy,
}

impl Settings {
    pub fn build(mode: Mode, overrides: &Overrides, file: &ClientConfig) -> Result<Self> {
        let target = resolve_target_from_env(overrides.server.as_deref());
        let wire = overrides.wire.unwrap_or_else(|| mode.default_wire());
        if wire == Wire::Framed && mode == Mode::Reliable {
            bail!("reliable mode needs the envelope wire to send acks");
        }

        let mut channel = ChannelConfig::new(target.clone())
            .with_connect_timeout(Duration::from_millis(file.channel.connect_timeout_ms));
        if !file.channel.keep_alive {
            channel = channel.without_keep_alive();
        }

        let mut policy = file.reconnect.policy();
        if let Some(max) = overrides.max_retries {
            policy = policy.with_max_retries(max);
        }
        policy.validate()?;

        let base = SessionConfig::plain()
            .with_write_poll(Duration::from_millis(file.session.write_poll_ms))
            .with_channel_buffer(file.session.channel_buffer);
        let session = match mode {
            Mode::AutoCancel => base.with_auto_cancel_secs(overrides.delay_secs)?,
            Mode::Simple => base,
            Mode::Reliable => SessionConfig {
                mode: SessionMode::Reliable(ReliabilityConfig {
                    drop_probability: overrides
                        .drop_probability
                        .unwrap_or(file.session.drop_probability),
                    seed: overrides.seed.or(file.session.seed),
                }),
                ..base
            },
        };
        session.validate()?;

        Ok(Self {
            mode,
            target,
            wire,
            channel,
            session,
            policy,
        })
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum Finished {
    Session(SessionReport),
    Controller(RunSummary),
}

/// Run the selected mode on `transport` until it ends or `shutdown` fires.
pub async fn execute(
    settings: &Settings,
    transport: Arc<dyn StreamTransport>,
    shutdown: CancellationToken,
) -> Finished {
    info!(
        mode = %settings.mode,
        server = %settings.target,
        wire = %settings.wire,
        "starting streaming client"
    );

    match settings.mode {
        Mode::AutoCancel => {
            info!(
                delay_ms = settings
                    .session
                    .auto_cancel_delay
                    .map(|d| d.as_millis() as u64),
                "auto-cancel armed"
            );
            let report = run_attempt(transport.as_ref(), &settings.session, 1, &shutdown).await;
            log_report(&report);
            Finished::Session(report)
        }
        Mode::Simple | Mode::Reliable => {
            let mut controller = ReconnectController::new(
                transport,
                settings.session.clone(),
                settings.policy.clone(),
            )
            .with_shutdown(shutdown);
            let summary = controller.run().await;
            info!(
                final_state = %summary.final_state,
                attempts = summary.attempts(),
                total_messages = summary.total_messages,
                "client finished"
            );
            if let Some(report) = &summary.last_report {
                log_report(report);
            }
            Finished::Controller(summary)
        }
    }
}

fn log_report(report: &SessionReport) {
    info!(
        attempt = report.attempt,
        outcome = %report.outcome,
        message_count = report.message_count,
        acks_sent = report.acks_sent,
        drops = report.drops,
        duplicates = report.duplicates,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "session summary"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_stream::{
        ControllerState, ErrorKind, MemoryTransport, Outcome, Script, ScriptedStream,
    };

    fn overrides() -> Overrides {
        Overrides {
            server: Some("localhost:6000".to_string()),
            delay_secs: 3.0,
            ..Overrides::default()
        }
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("auto_cancel".parse::<Mode>().unwrap(), Mode::AutoCancel);
        assert_eq!("simple".parse::<Mode>().unwrap(), Mode::Simple);
        assert_eq!("reliable".parse::<Mode>().unwrap(), Mode::Reliable);
        assert!("turbo".parse::<Mode>().is_err());
        assert_eq!(Mode::Reliable.to_string(), "reliable");
    }

    #[test]
    fn test_auto_cancel_settings() {
        let settings =
            Settings::build(Mode::AutoCancel, &overrides(), &ClientConfig::default()).unwrap();

        assert_eq!(settings.target, "localhost:6000");
        assert_eq!(settings.wire, Wire::Framed);
        assert_eq!(settings.channel.address, "http://localhost:6000");
        assert_eq!(settings.session.mode, SessionMode::Plain);
        assert_eq!(settings.session.auto_cancel_delay, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_simple_mode_has_no_auto_cancel() {
        let settings =
            Settings::build(Mode::Simple, &overrides(), &ClientConfig::default()).unwrap();
        assert!(settings.session.auto_cancel_delay.is_none());
        assert_eq!(settings.policy, ReconnectPolicy::default());
    }

    #[test]
    fn test_wire_defaults_follow_mode() {
        let file = ClientConfig::default();
        let wire = |mode, cli: &Overrides| Settings::build(mode, cli, &file).unwrap().wire;

        assert_eq!(wire(Mode::Simple, &overrides()), Wire::Framed);
        assert_eq!(wire(Mode::Reliable, &overrides()), Wire::Envelope);

        let envelope = Overrides {
            wire: Some(Wire::Envelope),
            ..overrides()
        };
        assert_eq!(wire(Mode::AutoCancel, &envelope), Wire::Envelope);

        let framed = Overrides {
            wire: Some(Wire::Framed),
            ..overrides()
        };
        assert!(Settings::build(Mode::Reliable, &framed, &file).is_err());
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let file = ClientConfig::parse(
            "[session]\ndrop_probability = 0.4\nseed = 1\n[reconnect]\nmax_retries = 9\n[channel]\nkeep_alive = false\n",
        )
        .unwrap();
        let cli = Overrides {
            drop_probability: Some(0.0),
            max_retries: Some(2),
            ..overrides()
        };

        let settings = Settings::build(Mode::Reliable, &cli, &file).unwrap();

        assert_eq!(
            settings.session.mode,
            SessionMode::Reliable(ReliabilityConfig {
                drop_probability: 0.0,
                seed: Some(1),
            })
        );
        assert_eq!(settings.policy.max_retries, 2);
        assert!(settings.channel.keep_alive.is_none());
    }

    #[test]
    fn test_invalid_overrides_are_rejected() {
        let bad_delay = Overrides {
            delay_secs: -1.0,
            ..overrides()
        };
        assert!(Settings::build(Mode::AutoCancel, &bad_delay, &ClientConfig::default()).is_err());

        let bad_drop = Overrides {
            drop_probability: Some(3.0),
            ..overrides()
        };
        assert!(Settings::build(Mode::Reliable, &bad_drop, &ClientConfig::default()).is_err());

        let no_retries = Overrides {
            max_retries: Some(0),
            ..overrides()
        };
        assert!(Settings::build(Mode::Simple, &no_retries, &ClientConfig::default()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_cancel_mode_runs_one_session() {
        let settings =
            Settings::build(Mode::AutoCancel, &overrides(), &ClientConfig::default()).unwrap();
        let transport = MemoryTransport::new([Script::Stream(ScriptedStream::periodic(
            10,
            Duration::from_secs(1),
        ))]);

        let shared: Arc<dyn StreamTransport> = Arc::new(transport.clone());
        let finished = execute(&settings, shared, CancellationToken::new()).await;

        let Finished::Session(report) = finished else {
            panic!("expected a single session");
        };
        assert_eq!(report.outcome, Outcome::Failed(ErrorKind::IntentionalCancel));
        assert_eq!(report.message_count, 4);
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reliable_mode_reconnects() {
        let cli = Overrides {
            drop_probability: Some(0.0),
            ..overrides()
        };
        let settings = Settings::build(Mode::Reliable, &cli, &ClientConfig::default()).unwrap();
        let transport = MemoryTransport::new([
            Script::ConnectFailure("refused".to_string()),
            Script::Stream(ScriptedStream::periodic(3, Duration::from_secs(1))),
        ]);

        let shared: Arc<dyn StreamTransport> = Arc::new(transport.clone());
        let finished = execute(&settings, shared, CancellationToken::new()).await;

        let Finished::Controller(summary) = finished else {
            panic!("expected a controller run");
        };
        assert_eq!(summary.final_state, ControllerState::Done);
        assert_eq!(summary.attempts(), 2);
        assert_eq!(summary.last_report.map(|r| r.acks_sent), Some(3));
    }
}
