//! Per-connection outbound queues.
//!
//! Every live socket owns a bounded queue drained by its writer task. The
//! coordinator only ever calls [`MessageTransport::send`] and
//! [`MessageTransport::close`], both of which return immediately: a closed,
//! unknown or full connection is logged and skipped.

use arrows_core::{ConnectionId, ProtocolError};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::codec::{self, Envelope};

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close reasons must fit in a control frame (125 bytes minus the code).
const MAX_REASON_BYTES: usize = 123;

/// Code and text of a WebSocket close frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseReason {
    /// Close code.
    pub code: u16,
    /// Close text, truncated to fit a control frame.
    pub reason: String,
}

impl CloseReason {
    /// Close frame with `code` and `reason`.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.len() > MAX_REASON_BYTES {
            let mut end = MAX_REASON_BYTES;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            reason.truncate(end);
        }
        Self { code, reason }
    }

    /// Normal closure after the last trial.
    pub fn complete() -> Self {
        Self::new(CLOSE_NORMAL, "session complete")
    }

    /// Normal closure carrying the abort reason.
    pub fn aborted(reason: &str) -> Self {
        Self::new(CLOSE_NORMAL, reason)
    }

    /// Coded closure for a protocol error.
    pub fn from_error(err: &ProtocolError) -> Self {
        Self::new(err.close_code(), err.to_string())
    }
}

/// Item on a connection's outbound queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Text frame.
    Text(String),
    /// Close frame; the writer stops after sending it.
    Close(CloseReason),
}

/// Outbound side of the connection layer, as seen by coordinators.
pub trait MessageTransport: Send + Sync + 'static {
    /// Queue `envelope` for `connection`. Returns whether it was queued.
    fn send(&self, connection: ConnectionId, envelope: &Envelope) -> bool;

    /// Queue a close frame and stop accepting sends for `connection`.
    fn close(&self, connection: ConnectionId, reason: CloseReason);
}

/// Registry of live connections and their outbound queues.
pub struct ConnectionHub {
    connections: DashMap<ConnectionId, mpsc::Sender<Outbound>>,
    queue_capacity: usize,
}

impl ConnectionHub {
    /// Hub whose per-connection queues hold `queue_capacity` items.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            queue_capacity,
        }
    }

    /// Register a new connection and return its ID and queue receiver.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let _ = self.connections.insert(id, tx);
        (id, rx)
    }

    /// Drop a connection's sender. Idempotent.
    pub fn unregister(&self, id: &ConnectionId) {
        let _ = self.connections.remove(id);
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Whether `id` is still registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    fn push(&self, connection: ConnectionId, item: Outbound) -> bool {
        let Some(tx) = self.connections.get(&connection).map(|entry| entry.value().clone()) else {
            debug!(connection_id = %connection, "send to unknown connection skipped");
            return false;
        };
        match tx.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection_id = %connection, "send queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection_id = %connection, "send to closed connection skipped");
                false
            }
        }
    }
}

impl MessageTransport for ConnectionHub {
    fn send(&self, connection: ConnectionId, envelope: &Envelope) -> bool {
        self.push(connection, Outbound::Text(codec::encode(envelope)))
    }

    fn close(&self, connection: ConnectionId, reason: CloseReason) {
        debug!(connection_id = %connection, code = reason.code, reason = %reason.reason, "closing connection");
        if !self.push(connection, Outbound::Close(reason)) {
            debug!(connection_id = %connection, "close frame not queued");
        }
        // Dropping the sender ends the writer once it drains.
        self.unregister(&connection);
    }
}
