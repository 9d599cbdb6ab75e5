// ABOUTME: Integration tests for the reconnection controller.
// ABOUTME: Checks retry budgets, backoff timing, and cooldowns against scripted in-memory servers.

use std::sync::Arc;
use std::time::Duration;

use tidal_stream::{
    ControllerState, ErrorKind, MemoryTransport, Outcome, ReconnectController, ReconnectPolicy,
    ReliabilityConfig, Script, ScriptedStream, SessionConfig,
};
use tokio_util::sync::CancellationToken;

const SECOND: Duration = Duration::from_secs(1);

fn controller(
    transport: &MemoryTransport,
    session: SessionConfig,
    policy: ReconnectPolicy,
) -> ReconnectController {
    ReconnectController::new(Arc::new(transport.clone()), session, policy)
}

/// Offsets of every open call from the first one.
fn open_offsets(transport: &MemoryTransport) -> Vec<Duration> {
    let opened = transport.opened_at();
    let first = opened[0];
    opened.iter().map(|t| t.duration_since(first)).collect()
}

fn refused() -> Script {
    Script::ConnectFailure("connection refused".to_string())
}

#[tokio::test(start_paused = true)]
async fn test_completes_on_first_attempt() {
    let transport = MemoryTransport::new([Script::Stream(ScriptedStream::periodic(3, SECOND))]);
    let mut c = controller(&transport, SessionConfig::plain(), ReconnectPolicy::default());

    let summary = c.run().await;

    assert_eq!(summary.final_state, ControllerState::Done);
    assert_eq!(summary.attempts(), 1);
    assert_eq!(summary.total_messages, 3);
    assert_eq!(summary.last_outcome(), Some(Outcome::Completed));
    assert_eq!(c.state(), ControllerState::Done);
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausts_budget_against_dead_server() {
    // An empty memory transport refuses every open.
    let transport = MemoryTransport::default();
    let mut c = controller(&transport, SessionConfig::plain(), ReconnectPolicy::default());

    let summary = c.run().await;

    assert_eq!(summary.final_state, ControllerState::Failed);
    assert_eq!(summary.attempts(), 50);
    assert_eq!(transport.open_count(), 50);
    assert_eq!(summary.total_messages, 0);
    assert_eq!(
        summary.last_outcome(),
        Some(Outcome::Failed(ErrorKind::TransportUnavailable))
    );
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_after_five_consecutive_failures() {
    let transport = MemoryTransport::new([
        refused(),
        refused(),
        refused(),
        refused(),
        refused(),
        Script::Stream(ScriptedStream::periodic(1, SECOND)),
    ]);
    let mut c = controller(&transport, SessionConfig::plain(), ReconnectPolicy::default());

    let summary = c.run().await;

    assert_eq!(summary.final_state, ControllerState::Done);
    assert_eq!(summary.attempts(), 6);
    assert_eq!(summary.retry.consecutive_failures, 0);
    // 1s backoff between failures; the fifth adds a 5s cooldown after its backoff.
    let expected = [0u32, 1, 2, 3, 4, 10].map(|s| s * SECOND).to_vec();
    assert_eq!(open_offsets(&transport), expected);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_resets_consecutive_failures() {
    let transport = MemoryTransport::default();
    let policy = ReconnectPolicy::default().with_max_retries(7);
    let mut c = controller(&transport, SessionConfig::plain(), policy);

    let summary = c.run().await;

    assert_eq!(summary.final_state, ControllerState::Failed);
    assert_eq!(summary.attempts(), 7);
    // Reset by the cooldown after the fifth, then two more failures.
    assert_eq!(summary.retry.consecutive_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_depends_on_failure_kind() {
    let transport = MemoryTransport::new([
        Script::Reject(tonic::Status::deadline_exceeded("slow")),
        Script::Reject(tonic::Status::internal("boom")),
        Script::Stream(ScriptedStream::new().fail(tonic::Status::cancelled("reset"))),
        Script::Stream(ScriptedStream::periodic(1, SECOND)),
    ]);
    let mut c = controller(&transport, SessionConfig::plain(), ReconnectPolicy::default());

    let summary = c.run().await;

    assert_eq!(summary.final_state, ControllerState::Done);
    assert_eq!(summary.attempts(), 4);
    assert_eq!(
        open_offsets(&transport),
        vec![Duration::ZERO, SECOND, 3 * SECOND, 5 * SECOND]
    );
}

#[tokio::test(start_paused = true)]
async fn test_messages_are_totalled_across_attempts() {
    let transport = MemoryTransport::new([
        Script::Stream(
            ScriptedStream::periodic(2, SECOND).fail(tonic::Status::unavailable("dropped")),
        ),
        Script::Stream(ScriptedStream::periodic(3, SECOND)),
    ]);
    let mut c = controller(&transport, SessionConfig::plain(), ReconnectPolicy::default());

    let summary = c.run().await;

    assert_eq!(summary.final_state, ControllerState::Done);
    assert_eq!(summary.attempts(), 2);
    assert_eq!(summary.total_messages, 5);
    assert_eq!(summary.last_report.map(|r| r.message_count), Some(3));
    // Two messages a second apart, then a 1s backoff.
    assert_eq!(open_offsets(&transport), vec![Duration::ZERO, 2 * SECOND]);
}

#[tokio::test(start_paused = true)]
async fn test_intentional_cancel_is_not_retried() {
    let transport = MemoryTransport::new([
        Script::Stream(ScriptedStream::periodic(3, SECOND)),
        Script::Stream(ScriptedStream::periodic(3, SECOND)),
    ]);
    let session = SessionConfig::plain().with_auto_cancel(Duration::ZERO);
    let mut c = controller(&transport, session, ReconnectPolicy::default());

    let summary = c.run().await;

    assert_eq!(summary.final_state, ControllerState::Done);
    assert_eq!(
        summary.last_outcome(),
        Some(Outcome::Failed(ErrorKind::IntentionalCancel))
    );
    assert_eq!(summary.total_messages, 1);
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_backoff_stops_the_run() {
    let transport = MemoryTransport::default();
    let shutdown = CancellationToken::new();
    let mut c = controller(&transport, SessionConfig::plain(), ReconnectPolicy::default())
        .with_shutdown(shutdown.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown.cancel();
    });

    let summary = c.run().await;

    assert_eq!(summary.final_state, ControllerState::Done);
    assert_eq!(summary.attempts(), 1);
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_streaming_stops_the_run() {
    let transport = MemoryTransport::new([Script::Stream(
        ScriptedStream::periodic(2, SECOND).hold(),
    )]);
    let shutdown = CancellationToken::new();
    let mut c = controller(&transport, SessionConfig::plain(), ReconnectPolicy::default())
        .with_shutdown(shutdown.clone());
    tokio::spawn(async move {
        tokio::time::sleep(3 * SECOND).await;
        shutdown.cancel();
    });

    let summary = c.run().await;

    assert_eq!(summary.final_state, ControllerState::Done);
    assert_eq!(
        summary.last_outcome(),
        Some(Outcome::Failed(ErrorKind::LocalTaskCancelled))
    );
    assert_eq!(summary.total_messages, 2);
}

#[tokio::test(start_paused = true)]
async fn test_reliable_sessions_ack_on_every_attempt() {
    let transport = MemoryTransport::new([
        Script::Stream(
            ScriptedStream::periodic(3, SECOND).fail(tonic::Status::unavailable("dropped")),
        ),
        Script::Stream(ScriptedStream::periodic(2, SECOND)),
    ]);
    let session = SessionConfig::reliable(ReliabilityConfig::new(0.0).unwrap());
    let mut c = controller(&transport, session, ReconnectPolicy::default());

    let summary = c.run().await;

    assert_eq!(summary.final_state, ControllerState::Done);
    assert_eq!(transport.sent(0).len(), 3);
    assert_eq!(transport.sent(1).len(), 2);
}
