//! Transport seam for the telemetry websocket layer.
//!
//! The multiplexer only needs two things from a connection: a way to hand over
//! an encoded command batch, and a stream of raw inbound frames. Opening,
//! authenticating and reconnecting the socket live behind this trait.

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

pub trait Transport: Send + Sync {
    /// Fire-and-forget send of one encoded command batch.
    fn publish(&self, payload: Bytes) -> TransportResult<()>;

    /// Inbound frames in arrival order, each delivered exactly once. There is a
    /// single consumer: a later call takes over the stream and the previous
    /// receiver ends.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Bytes>;
}

#[derive(Debug)]
struct Inbound {
    sender: Option<mpsc::UnboundedSender<Bytes>>,
    /// Frames delivered before anyone subscribed wait here.
    pending: Option<mpsc::UnboundedReceiver<Bytes>>,
}

/// In-memory loopback: records every published batch and lets the caller
/// inject inbound frames as if the server had sent them.
#[derive(Debug)]
pub struct LocalTransport {
    inbound: Mutex<Inbound>,
    sent: Mutex<Vec<Bytes>>,
    open: Mutex<bool>,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inbound: Mutex::new(Inbound {
                sender: Some(tx),
                pending: Some(rx),
            }),
            sent: Mutex::new(Vec::new()),
            open: Mutex::new(true),
        }
    }

    /// Queue a frame for the inbound consumer.
    pub fn deliver(&self, payload: impl Into<Bytes>) -> TransportResult<()> {
        let inbound = self.inbound.lock();
        let sender = inbound.sender.as_ref().ok_or(TransportError::Closed)?;
        sender
            .send(payload.into())
            .map_err(|_| TransportError::Closed)
    }

    /// Batches published so far, oldest first. Clears the record.
    pub fn take_sent(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Simulates a dropped connection: publishes fail until reopened.
    pub fn set_open(&self, open: bool) {
        *self.open.lock() = open;
    }

    /// Ends the inbound stream; the consumer sees `None` after draining.
    pub fn close_inbound(&self) {
        self.inbound.lock().sender.take();
    }
}

impl Transport for LocalTransport {
    fn publish(&self, payload: Bytes) -> TransportResult<()> {
        if !*self.open.lock() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Bytes> {
        let mut inbound = self.inbound.lock();
        if let Some(rx) = inbound.pending.take() {
            return rx;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        if inbound.sender.is_some() {
            inbound.sender = Some(tx);
        }
        // When closed, `tx` drops here and the receiver ends immediately.
        rx
    }
}
