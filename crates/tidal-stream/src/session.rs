// ABOUTME: Duplex stream session owning one bidirectional call.
// ABOUTME: Runs the read loop and write loop concurrently and reports a classified outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tidal_proto::{DataMessage, StreamMessage};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auto_cancel::AutoCancelTrigger;
use crate::classify::{classify, ErrorKind, Outcome, Termination};
use crate::config::{SessionConfig, SessionMode};
use crate::error::SessionError;
use crate::reliability::{ReliabilityLayer, ReliabilityStats};
use crate::stream::{message_channel, MessageReceiver, OutboundStream, Received, StreamSender};
use crate::transport::{InboundStream, StreamTransport};

/// Requests local cancellation of a session.
///
/// The request is recorded before the call is torn down, so the classifier
/// knows the termination was intentional whatever status surfaces.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    requested: Arc<AtomicBool>,
    token: CancellationToken,
}

impl CancelHandle {
    /// Safe to call from inside the read loop and more than once.
    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Per-attempt state, owned by exactly one session. The terminal outcome is
/// not kept here: `run` consumes the state and reports it in [`SessionReport`].
#[derive(Debug, Clone)]
pub struct SessionState {
    /// DataMessages observed by the read loop.
    pub message_count: u64,
    pub start_time: Instant,
    pub auto_cancel_deadline: Option<Duration>,
}

impl SessionState {
    fn new(auto_cancel_deadline: Option<Duration>) -> Self {
        Self {
            message_count: 0,
            start_time: Instant::now(),
            auto_cancel_deadline,
        }
    }
}

/// What one attempt amounted to.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub attempt: u32,
    pub outcome: Outcome,
    pub message_count: u64,
    /// Acks actually written to the outbound stream.
    pub acks_sent: u64,
    pub drops: u64,
    pub duplicates: u64,
    pub elapsed: Duration,
    pub detail: Option<String>,
}

impl SessionReport {
    /// Report for an attempt that never got a stream.
    pub fn from_open_error(attempt: u32, err: SessionError) -> Self {
        let termination = Termination::from(err);
        let outcome = classify(&termination, false);
        log_outcome(attempt, outcome, &termination, 0);
        Self {
            attempt,
            outcome,
            message_count: 0,
            acks_sent: 0,
            drops: 0,
            duplicates: 0,
            elapsed: Duration::ZERO,
            detail: termination.detail(),
        }
    }

    /// Report for an attempt interrupted by process shutdown before it opened.
    pub fn from_shutdown(attempt: u32) -> Self {
        Self {
            attempt,
            outcome: Outcome::Failed(ErrorKind::LocalTaskCancelled),
            message_count: 0,
            acks_sent: 0,
            drops: 0,
            duplicates: 0,
            elapsed: Duration::ZERO,
            detail: None,
        }
    }
}

/// One open bidirectional call and everything scoped to it.
pub struct Session {
    attempt: u32,
    config: SessionConfig,
    inbound: InboundStream,
    outbound: StreamSender<StreamMessage>,
    cancel: CancelHandle,
    shutdown: CancellationToken,
    state: SessionState,
}

impl Session {
    /// Open the call on `transport`.
    pub async fn open(
        transport: &dyn StreamTransport,
        config: SessionConfig,
        attempt: u32,
    ) -> Result<Self, SessionError> {
        let OutboundStream { sender, stream } = OutboundStream::new(config.channel_buffer);
        debug!(attempt, server = transport.target(), "opening bidirectional stream");
        let inbound = transport.open(stream).await?;
        let state = SessionState::new(config.auto_cancel_delay);
        Ok(Self {
            attempt,
            config,
            inbound,
            outbound: sender,
            cancel: CancelHandle::default(),
            shutdown: CancellationToken::new(),
            state,
        })
    }

    /// End the session as `LocalTaskCancelled` when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Request local cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run the read and write loops until the stream ends, then classify.
    pub async fn run(self) -> SessionReport {
        let Session {
            attempt,
            config,
            inbound,
            outbound,
            cancel,
            shutdown,
            state,
        } = self;

        let reliability = match &config.mode {
            SessionMode::Plain => None,
            SessionMode::Reliable(rc) => Some(ReliabilityLayer::for_attempt(rc, attempt)),
        };
        let (acks, ack_queue) = message_channel(config.channel_buffer);
        let done = CancellationToken::new();

        let reader = ReadLoop {
            attempt,
            inbound,
            acks: Some(acks),
            reliability,
            auto_cancel: AutoCancelTrigger::new(config.auto_cancel_delay),
            cancel: cancel.clone(),
            shutdown,
            done: done.clone(),
            state,
        };

        // Both loops share this task; they interleave only at await points.
        let ((termination, state, stats), acks_sent) = tokio::join!(
            reader.run(),
            write_loop(attempt, ack_queue, outbound, done, config.write_poll)
        );

        let outcome = classify(&termination, cancel.is_requested());
        log_outcome(attempt, outcome, &termination, state.message_count);

        SessionReport {
            attempt,
            outcome,
            message_count: state.message_count,
            acks_sent,
            drops: stats.dropped,
            duplicates: stats.duplicates,
            elapsed: state.start_time.elapsed(),
            detail: termination.detail(),
        }
    }
}

/// Open one attempt, racing `shutdown`. The returned session ends as
/// `LocalTaskCancelled` when `shutdown` fires; an attempt that never opened
/// comes back as its final report.
pub async fn open_attempt(
    transport: &dyn StreamTransport,
    config: &SessionConfig,
    attempt: u32,
    shutdown: &CancellationToken,
) -> Result<Session, SessionReport> {
    let opened = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return Err(SessionReport::from_shutdown(attempt)),
        opened = Session::open(transport, config.clone(), attempt) => opened,
    };
    opened
        .map(|session| session.with_shutdown(shutdown.clone()))
        .map_err(|err| SessionReport::from_open_error(attempt, err))
}

/// Open and run one attempt.
pub async fn run_attempt(
    transport: &dyn StreamTransport,
    config: &SessionConfig,
    attempt: u32,
    shutdown: &CancellationToken,
) -> SessionReport {
    match open_attempt(transport, config, attempt, shutdown).await {
        Ok(session) => session.run().await,
        Err(report) => report,
    }
}

struct ReadLoop {
    attempt: u32,
    inbound: InboundStream,
    /// `None` once the writer has gone away; later acks are not queued.
    acks: Option<StreamSender<StreamMessage>>,
    reliability: Option<ReliabilityLayer>,
    auto_cancel: AutoCancelTrigger,
    cancel: CancelHandle,
    shutdown: CancellationToken,
    done: CancellationToken,
    state: SessionState,
}

impl ReadLoop {
    /// Consumes the loop; dropping `acks` on return closes the ack queue.
    async fn run(mut self) -> (Termination, SessionState, ReliabilityStats) {
        let termination = self.read().await;
        self.done.cancel();
        let stats = self
            .reliability
            .as_ref()
            .map(ReliabilityLayer::stats)
            .unwrap_or_default();
        (termination, self.state, stats)
    }

    async fn read(&mut self) -> Termination {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Termination::LocalCancel,
                _ = self.shutdown.cancelled() => return Termination::TaskCancelled,
                next = self.inbound.next() => next,
            };

            let envelope = match next {
                None => return Termination::RemoteClosed,
                Some(Err(status)) => return Termination::Rpc(status),
                Some(Ok(envelope)) => envelope,
            };

            let Some(data) = envelope.as_data() else {
                debug!(attempt = self.attempt, "ignoring envelope without data");
                continue;
            };

            self.state.message_count += 1;
            info!(
                attempt = self.attempt,
                message_id = data.id,
                payload = %String::from_utf8_lossy(&data.payload),
                "received message"
            );

            if let Err(termination) = self.acknowledge(data).await {
                return termination;
            }

            let elapsed = self.state.start_time.elapsed();
            if self.auto_cancel.observe(elapsed) {
                info!(
                    attempt = self.attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    delay_ms = self
                        .state
                        .auto_cancel_deadline
                        .map(|d| d.as_millis() as u64),
                    "auto-cancel triggered, cancelling stream"
                );
                self.cancel.cancel();
                return Termination::LocalCancel;
            }
        }
    }

    async fn acknowledge(&mut self, data: &DataMessage) -> Result<(), Termination> {
        let Some(layer) = self.reliability.as_mut() else {
            return Ok(());
        };
        let Some(ack) = layer.on_data(data) else {
            return Ok(());
        };
        let Some(acks) = self.acks.as_ref() else {
            return Ok(());
        };
        let ack_id = ack.ack_id;

        // A full queue must not keep cancellation from ending the session.
        let queued = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Termination::LocalCancel),
            _ = self.shutdown.cancelled() => return Err(Termination::TaskCancelled),
            queued = acks.send(StreamMessage::ack(ack)) => queued,
        };
        match queued {
            Ok(()) => debug!(attempt = self.attempt, message_id = ack_id, "queued ack"),
            Err(_) => {
                warn!(
                    attempt = self.attempt,
                    message_id = ack_id,
                    "ack writer stopped, no further acks this session"
                );
                self.acks = None;
            }
        }
        Ok(())
    }
}

/// Drain the ack queue into the outbound stream until the queue closes or
/// the session is done. An envelope blocked on a full outbound stream is
/// abandoned once the session is done. Returns the number of envelopes written.
async fn write_loop(
    attempt: u32,
    mut queue: MessageReceiver<StreamMessage>,
    outbound: StreamSender<StreamMessage>,
    done: CancellationToken,
    poll: Duration,
) -> u64 {
    let mut sent = 0;
    loop {
        match queue.recv_timeout(poll).await {
            Received::Item(msg) => {
                let ack_id = msg.as_ack().map(|a| a.ack_id);
                let written = tokio::select! {
                    biased;
                    written = outbound.send(msg) => written,
                    _ = done.cancelled() => {
                        debug!(
                            attempt,
                            message_id = ack_id,
                            "outbound stream full at session end"
                        );
                        break;
                    }
                };
                if let Err(e) = written {
                    warn!(attempt, error = %e, "outbound stream closed, stopping writer");
                    break;
                }
                sent += 1;
                info!(attempt, message_id = ack_id, "sent ack");
            }
            Received::Closed => break,
            Received::TimedOut if done.is_cancelled() => break,
            Received::TimedOut => continue,
        }
    }
    debug!(attempt, sent, "write loop finished");
    sent
}

fn log_outcome(attempt: u32, outcome: Outcome, termination: &Termination, message_count: u64) {
    let detail = termination.detail().unwrap_or_default();
    match outcome {
        Outcome::Completed => {
            info!(attempt, message_count, "stream ended normally")
        }
        Outcome::Failed(ErrorKind::IntentionalCancel) => {
            info!(attempt, message_count, "stream cancelled by client")
        }
        Outcome::Failed(ErrorKind::Cancelled) => warn!(
            attempt,
            message_count,
            %detail,
            "stream cancelled without a local cancel (externally observed)"
        ),
        Outcome::Failed(ErrorKind::LocalTaskCancelled) => {
            info!(attempt, message_count, "session task cancelled")
        }
        Outcome::Failed(kind) => warn!(
            attempt,
            message_count,
            kind = %kind,
            %detail,
            "stream failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_handle_records_request() {
        let handle = CancelHandle::default();
        let clone = handle.clone();
        assert!(!handle.is_requested());

        clone.cancel();
        clone.cancel();

        assert!(handle.is_requested());
        assert!(handle.token.is_cancelled());
    }

    #[test]
    fn test_report_from_connect_error() {
        let report =
            SessionReport::from_open_error(3, SessionError::Connect("refused".to_string()));
        assert_eq!(report.attempt, 3);
        assert_eq!(
            report.outcome,
            Outcome::Failed(ErrorKind::TransportUnavailable)
        );
        assert_eq!(report.message_count, 0);
        assert_eq!(report.detail.as_deref(), Some("refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_loop_stops_when_done_and_idle() {
        let (_acks, queue) = message_channel::<StreamMessage>(4);
        let outbound = OutboundStream::<StreamMessage>::new(4);
        let done = CancellationToken::new();
        done.cancel();

        let started = Instant::now();
        let sent = write_loop(
            1,
            queue,
            outbound.sender,
            done,
            Duration::from_millis(500),
        )
        .await;

        assert_eq!(sent, 0);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_loop_abandons_full_outbound_when_done() {
        let (acks, queue) = message_channel::<StreamMessage>(4);
        let outbound = OutboundStream::<StreamMessage>::new(1);
        let _unread = outbound.stream;
        for id in 1..=2 {
            acks.send(StreamMessage::ack(tidal_proto::AckMessage {
                ack_id: id,
                timestamp: 0,
            }))
            .await
            .unwrap();
        }
        let done = CancellationToken::new();
        let finish = done.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            finish.cancel();
        });

        let started = Instant::now();
        let sent = write_loop(1, queue, outbound.sender, done, Duration::from_millis(500)).await;

        assert_eq!(sent, 1);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        drop(acks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_loop_drains_queue_before_close() {
        let (acks, queue) = message_channel::<StreamMessage>(4);
        let outbound = OutboundStream::<StreamMessage>::new(4);
        let mut written = outbound.stream.into_inner();
        for id in 1..=3 {
            acks.send(StreamMessage::ack(tidal_proto::AckMessage {
                ack_id: id,
                timestamp: 0,
            }))
            .await
            .unwrap();
        }
        drop(acks);

        let sent = write_loop(
            1,
            queue,
            outbound.sender,
            CancellationToken::new(),
            Duration::from_millis(500),
        )
        .await;

        assert_eq!(sent, 3);
        let mut ids = Vec::new();
        while let Ok(msg) = written.try_recv() {
            ids.push(msg.as_ack().map(|a| a.ack_id).unwrap_or_default());
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
