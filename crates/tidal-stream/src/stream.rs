// ABOUTME: Bounded FIFO hand-off channels used by a streaming session.
// ABOUTME: The ack queue between read and write loops, and the outbound half of the gRPC call.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::SessionError;

/// Capacity of the ack queue and the outbound stream unless configured.
pub const DEFAULT_CHANNEL_BUFFER: usize = 100;

/// Producer side of a bounded hand-off.
#[derive(Debug, Clone)]
pub struct StreamSender<T> {
    inner: mpsc::Sender<T>,
}

impl<T> StreamSender<T> {
    pub fn new(sender: mpsc::Sender<T>) -> Self {
        Self { inner: sender }
    }

    /// Waits while the channel is full. Fails once the receiver is gone.
    pub async fn send(&self, msg: T) -> Result<(), SessionError> {
        self.inner
            .send(msg)
            .await
            .map_err(|_| SessionError::StreamClosed)
    }
}

/// Result of a bounded wait on a [`MessageReceiver`].
#[derive(Debug, PartialEq)]
pub enum Received<T> {
    Item(T),
    /// Every sender was dropped and the queue is drained.
    Closed,
    TimedOut,
}

#[derive(Debug)]
pub struct MessageReceiver<T> {
    inner: mpsc::Receiver<T>,
}

impl<T> MessageReceiver<T> {
    /// Wait up to `wait` for the next item.
    ///
    /// Dropping the last sender wakes a pending wait immediately with
    /// [`Received::Closed`] once queued items are drained.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Received<T> {
        match tokio::time::timeout(wait, self.inner.recv()).await {
            Ok(Some(item)) => Received::Item(item),
            Ok(None) => Received::Closed,
            Err(_) => Received::TimedOut,
        }
    }
}

/// Bounded FIFO queue, used between the read and write loops.
pub fn message_channel<T>(capacity: usize) -> (StreamSender<T>, MessageReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (StreamSender::new(tx), MessageReceiver { inner: rx })
}

/// Client-to-server half of a call: `stream` goes to the transport, `sender`
/// to the write loop. The request stream ends when every sender is dropped.
pub struct OutboundStream<T> {
    pub sender: StreamSender<T>,
    pub stream: ReceiverStream<T>,
}

impl<T> OutboundStream<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            sender: StreamSender::new(tx),
            stream: ReceiverStream::new(rx),
        }
    }
}
