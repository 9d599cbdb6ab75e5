// ABOUTME: Transport seam for opening the bidirectional streaming call.
// ABOUTME: GrpcTransport connects a tonic channel per attempt; MemoryTransport replays scripts in-process.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::{future, stream, Stream, StreamExt};
use tidal_proto::{
    framed, DataMessage, FramedStreamingServiceClient, StreamMessage, StreamingServiceClient,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

use crate::channel::{create_channel, ChannelConfig};
use crate::error::{ConfigError, SessionError};

/// Server-to-client half of an open streaming call.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<StreamMessage, tonic::Status>> + Send>>;

/// Opens one streaming call per invocation.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Start the call. `outbound` is the client-to-server half; the call
    /// keeps reading it until every sender feeding it has been dropped.
    async fn open(
        &self,
        outbound: ReceiverStream<StreamMessage>,
    ) -> Result<InboundStream, SessionError>;

    /// Human-readable target, for logs.
    fn target(&self) -> &str;
}

/// Message schema spoken on the streaming call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wire {
    /// `StreamMessage` envelopes carrying data and acks.
    #[default]
    Envelope,
    /// Bare `DataMessage` frames. Acks have no representation and are not sent.
    Framed,
}

impl Wire {
    pub fn as_str(&self) -> &'static str {
        match self {
            Wire::Envelope => "envelope",
            Wire::Framed => "framed",
        }
    }
}

impl fmt::Display for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Wire {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "envelope" => Ok(Wire::Envelope),
            "framed" => Ok(Wire::Framed),
            other => Err(ConfigError::UnknownWire(other.to_string())),
        }
    }
}

/// Transport over a real gRPC connection.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    config: ChannelConfig,
    wire: Wire,
}

impl GrpcTransport {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            wire: Wire::default(),
        }
    }

    pub fn with_wire(mut self, wire: Wire) -> Self {
        self.wire = wire;
        self
    }

    pub fn channel_config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn wire(&self) -> Wire {
        self.wire
    }
}

#[async_trait]
impl StreamTransport for GrpcTransport {
    async fn open(
        &self,
        outbound: ReceiverStream<StreamMessage>,
    ) -> Result<InboundStream, SessionError> {
        // A fresh connection per attempt: a reconnect must not reuse a dead channel.
        let channel = create_channel(&self.config).await?;
        let inbound: InboundStream = match self.wire {
            Wire::Envelope => {
                let mut client = StreamingServiceClient::new(channel);
                let response = client
                    .bidirectional_stream(outbound)
                    .await
                    .map_err(SessionError::Rpc)?;
                Box::pin(response.into_inner())
            }
            Wire::Framed => {
                let mut client = FramedStreamingServiceClient::new(channel);
                let response = client
                    .bidirectional_stream(framed_outbound(outbound))
                    .await
                    .map_err(SessionError::Rpc)?;
                Box::pin(framed_inbound(response.into_inner()))
            }
        };

        tracing::debug!(
            address = %self.config.address,
            wire = %self.wire,
            "bidirectional stream established"
        );
        Ok(inbound)
    }

    fn target(&self) -> &str {
        &self.config.address
    }
}

/// Client-to-server frames for the framed wire. Envelopes without data are
/// skipped; the frame stream still ends only when the envelope stream does.
fn framed_outbound(
    outbound: impl Stream<Item = StreamMessage> + Send + 'static,
) -> impl Stream<Item = framed::DataMessage> + Send + 'static {
    outbound.filter_map(|msg| future::ready(msg.as_data().map(framed::DataMessage::from)))
}

/// Server-to-client frames for the framed wire, as data envelopes.
fn framed_inbound(
    frames: impl Stream<Item = Result<framed::DataMessage, tonic::Status>> + Send + 'static,
) -> impl Stream<Item = Result<StreamMessage, tonic::Status>> + Send + 'static {
    frames.map(|frame| frame.map(|data| StreamMessage::data(data.into())))
}

/// What a [`MemoryTransport`] does on one `open` call.
#[derive(Debug, Clone)]
pub enum Script {
    /// `open` fails as if the server were unreachable.
    ConnectFailure(String),
    /// `open` fails with the given status.
    Reject(tonic::Status),
    /// `open` succeeds and the server side plays this stream.
    Stream(ScriptedStream),
}

#[derive(Debug, Clone)]
enum Step {
    Wait(Duration),
    Send(StreamMessage),
}

/// How a scripted server stream ends.
#[derive(Debug, Clone, Default)]
pub enum StreamEnd {
    /// The server closes the stream normally.
    #[default]
    Close,
    /// The stream terminates with this status.
    Fail(tonic::Status),
    /// The stream never ends on its own.
    Hold,
}

/// A timed sequence of server-to-client envelopes.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStream {
    steps: Vec<Step>,
    end: StreamEnd,
}

impl ScriptedStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` data messages with ids `1..=count`, one every `interval`,
    /// the first one immediately. Then the stream closes.
    pub fn periodic(count: u64, interval: Duration) -> Self {
        let mut script = Self::new();
        for id in 1..=count {
            if id > 1 {
                script = script.wait(interval);
            }
            script = script.data(id, format!("Message {id}"));
        }
        script
    }

    pub fn wait(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Wait(duration));
        self
    }

    pub fn data(self, id: u64, payload: impl Into<Vec<u8>>) -> Self {
        self.envelope(StreamMessage::data(DataMessage {
            id,
            timestamp: 0,
            payload: payload.into(),
            needs_ack: true,
        }))
    }

    pub fn envelope(mut self, msg: StreamMessage) -> Self {
        self.steps.push(Step::Send(msg));
        self
    }

    pub fn close(mut self) -> Self {
        self.end = StreamEnd::Close;
        self
    }

    pub fn fail(mut self, status: tonic::Status) -> Self {
        self.end = StreamEnd::Fail(status);
        self
    }

    pub fn hold(mut self) -> Self {
        self.end = StreamEnd::Hold;
        self
    }

    fn into_inbound(self) -> InboundStream {
        let ScriptedStream { steps, end } = self;
        let body = stream::unfold(steps.into_iter(), |mut steps| async move {
            while let Some(step) = steps.next() {
                match step {
                    Step::Wait(d) => tokio::time::sleep(d).await,
                    Step::Send(msg) => return Some((Ok::<_, tonic::Status>(msg), steps)),
                }
            }
            None
        });
        let tail: InboundStream = match end {
            StreamEnd::Close => Box::pin(stream::empty()),
            StreamEnd::Fail(status) => Box::pin(stream::once(async move { Err(status) })),
            StreamEnd::Hold => Box::pin(stream::pending()),
        };
        Box::pin(body.chain(tail))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    scripts: VecDeque<Script>,
    opened_at: Vec<Instant>,
    outbound: Vec<mpsc::Receiver<StreamMessage>>,
}

/// In-process transport that plays one [`Script`] per `open` call.
///
/// Every client-to-server envelope is retained per attempt, so the capacity
/// of the session's outbound channel bounds how many can be sent unread.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        let state = MemoryState {
            scripts: scripts.into_iter().collect(),
            ..MemoryState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Queue another script behind the existing ones.
    pub fn push(&self, script: Script) {
        self.lock().scripts.push_back(script);
    }

    /// Number of `open` calls so far, successful or not.
    pub fn open_count(&self) -> usize {
        self.lock().opened_at.len()
    }

    /// When each `open` call happened.
    pub fn opened_at(&self) -> Vec<Instant> {
        self.lock().opened_at.clone()
    }

    /// Envelopes the client sent during the `index`-th successful stream
    /// that have not been taken yet.
    pub fn sent(&self, index: usize) -> Vec<StreamMessage> {
        let mut state = self.lock();
        let mut sent = Vec::new();
        if let Some(rx) = state.outbound.get_mut(index) {
            while let Ok(msg) = rx.try_recv() {
                sent.push(msg);
            }
        }
        sent
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StreamTransport for MemoryTransport {
    async fn open(
        &self,
        outbound: ReceiverStream<StreamMessage>,
    ) -> Result<InboundStream, SessionError> {
        let script = {
            let mut state = self.lock();
            state.opened_at.push(Instant::now());
            state.scripts.pop_front()
        };
        match script {
            None => Err(SessionError::Connect(
                "memory transport has no script left".to_string(),
            )),
            Some(Script::ConnectFailure(reason)) => Err(SessionError::Connect(reason)),
            Some(Script::Reject(status)) => Err(SessionError::Rpc(status)),
            Some(Script::Stream(script)) => {
                self.lock().outbound.push(outbound.into_inner());
                Ok(script.into_inbound())
            }
        }
    }

    fn target(&self) -> &str {
        "memory"
    }
}
