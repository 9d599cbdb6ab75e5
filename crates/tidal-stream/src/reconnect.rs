// ABOUTME: Reconnection controller driving repeated session attempts.
// ABOUTME: Applies per-failure backoff, a cooldown after consecutive failures, and a retry budget.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::{ErrorKind, Outcome};
use crate::config::{ReconnectPolicy, SessionConfig};
use crate::session::{open_attempt, SessionReport};
use crate::transport::StreamTransport;

/// States of the reconnection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Connecting,
    Streaming,
    Backoff,
    Cooldown,
    /// Terminal: a session completed, or the run was stopped on purpose.
    Done,
    /// Terminal: the retry budget is exhausted.
    Failed,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Idle => "idle",
            ControllerState::Connecting => "connecting",
            ControllerState::Streaming => "streaming",
            ControllerState::Backoff => "backoff",
            ControllerState::Cooldown => "cooldown",
            ControllerState::Done => "done",
            ControllerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Counters that persist across attempts of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made, successful or not. Never reset within a run.
    pub attempt_count: u32,
    /// Failures since the last completion or cooldown.
    pub consecutive_failures: u32,
}

/// What the controller does after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Stop(ControllerState),
    Retry { delay: Duration },
}

/// Final result of a controller run. Exhausting the budget is reported here,
/// not raised.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub final_state: ControllerState,
    pub retry: RetryState,
    /// DataMessages received across every attempt.
    pub total_messages: u64,
    pub last_report: Option<SessionReport>,
}

impl RunSummary {
    pub fn attempts(&self) -> u32 {
        self.retry.attempt_count
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        self.last_report.as_ref().map(|r| r.outcome)
    }
}

/// Drives sessions on one transport until completion or exhaustion.
/// Only one session is active at any time.
pub struct ReconnectController {
    transport: Arc<dyn StreamTransport>,
    session: SessionConfig,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
    retry: RetryState,
    state: ControllerState,
}

impl ReconnectController {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        session: SessionConfig,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            session,
            policy,
            shutdown: CancellationToken::new(),
            retry: RetryState::default(),
            state: ControllerState::Idle,
        }
    }

    /// Stop the run when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn retry_state(&self) -> RetryState {
        self.retry
    }

    /// Run attempts until a terminal state.
    pub async fn run(&mut self) -> RunSummary {
        let mut total_messages = 0;
        let mut last_report = None;

        loop {
            self.transition(ControllerState::Connecting);
            self.retry.attempt_count += 1;
            let attempt = self.retry.attempt_count;
            info!(
                attempt,
                max_retries = self.policy.max_retries,
                server = self.transport.target(),
                "connection attempt"
            );

            let opened = open_attempt(
                self.transport.as_ref(),
                &self.session,
                attempt,
                &self.shutdown,
            )
            .await;
            let report = match opened {
                Ok(session) => {
                    self.transition(ControllerState::Streaming);
                    session.run().await
                }
                Err(report) => report,
            };
            total_messages += report.message_count;
            let decision = self.decide(report.outcome);
            last_report = Some(report);

            match decision {
                Decision::Stop(terminal) => {
                    self.transition(terminal);
                    break;
                }
                Decision::Retry { delay } => {
                    info!(
                        attempt,
                        max_retries = self.policy.max_retries,
                        total_messages,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after backoff"
                    );
                    self.transition(ControllerState::Backoff);
                    if !self.pause(delay).await {
                        self.transition(ControllerState::Done);
                        break;
                    }

                    if self.retry.consecutive_failures >= self.policy.cooldown_threshold {
                        warn!(
                            consecutive_failures = self.retry.consecutive_failures,
                            cooldown_ms = self.policy.cooldown.as_millis() as u64,
                            "too many consecutive failures, cooling down"
                        );
                        self.transition(ControllerState::Cooldown);
                        let resumed = self.pause(self.policy.cooldown).await;
                        self.retry.consecutive_failures = 0;
                        if !resumed {
                            self.transition(ControllerState::Done);
                            break;
                        }
                    }
                }
            }
        }

        let summary = RunSummary {
            final_state: self.state,
            retry: self.retry,
            total_messages,
            last_report,
        };
        info!(
            final_state = %summary.final_state,
            attempts = summary.attempts(),
            total_messages = summary.total_messages,
            "run finished"
        );
        summary
    }

    /// Update counters for an attempt's outcome and pick the next step.
    pub fn decide(&mut self, outcome: Outcome) -> Decision {
        let kind = match outcome {
            Outcome::Completed => {
                self.retry.consecutive_failures = 0;
                return Decision::Stop(ControllerState::Done);
            }
            Outcome::Failed(ErrorKind::IntentionalCancel | ErrorKind::LocalTaskCancelled) => {
                return Decision::Stop(ControllerState::Done);
            }
            Outcome::Failed(kind) => kind,
        };

        self.retry.consecutive_failures += 1;
        if self.retry.attempt_count >= self.policy.max_retries {
            warn!(
                attempts = self.retry.attempt_count,
                last_error = %kind,
                "max retries reached"
            );
            return Decision::Stop(ControllerState::Failed);
        }

        let delay = if kind.is_transport() {
            self.policy.transport_backoff
        } else {
            self.policy.other_backoff
        };
        Decision::Retry { delay }
    }

    /// Sleep unless shutdown arrives first. Returns false on shutdown.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.shutdown.cancelled() => {
                info!("shutdown requested, abandoning retries");
                false
            }
        }
    }

    fn transition(&mut self, next: ControllerState) {
        debug!(from = %self.state, to = %next, "controller state");
        self.state = next;
    }
}
