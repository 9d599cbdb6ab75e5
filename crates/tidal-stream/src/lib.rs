// ABOUTME: Client side of a long-lived bidirectional gRPC stream.
// ABOUTME: Duplex sessions, simulated-loss acknowledgment, failure classification, and reconnection.

pub mod auto_cancel;
pub mod channel;
pub mod classify;
pub mod config;
pub mod error;
pub mod reconnect;
pub mod reliability;
pub mod session;
pub mod stream;
pub mod transport;

// Channel creation
pub use channel::{create_channel, ChannelConfig, KeepAliveConfig};

// Configuration
pub use config::{
    resolve_target, resolve_target_from_env, ReconnectPolicy, SessionConfig, SessionMode,
    DEFAULT_SERVER_ADDRESS, DEFAULT_WRITE_POLL, SERVER_ADDRESS_ENV,
};

// Error types
pub use error::{ConfigError, SessionError};

// Classification
pub use classify::{classify, ErrorKind, Outcome, Termination};

// Session
pub use auto_cancel::AutoCancelTrigger;
pub use reliability::{
    ReliabilityConfig, ReliabilityLayer, ReliabilityStats, DEFAULT_DROP_PROBABILITY,
};
pub use session::{open_attempt, run_attempt, CancelHandle, Session, SessionReport, SessionState};
pub use stream::{message_channel, MessageReceiver, OutboundStream, Received, StreamSender};

// Reconnection
pub use reconnect::{ControllerState, Decision, ReconnectController, RetryState, RunSummary};

// Transports
pub use transport::{
    GrpcTransport, InboundStream, MemoryTransport, Script, ScriptedStream, StreamEnd,
    StreamTransport, Wire,
};

// Re-export proto types for convenience
pub use tidal_proto;
