//! Transport Abstraction
//!
//! The relay core only needs a handful of operations from the link
//! layer: accept, poll events, send, disconnect and an is-alive check.
//! Everything is non-blocking so it can be driven from a single tick.

use std::fmt;
use thiserror::Error;

/// Opaque handle to one transport link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Something that happened on a link since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Link established.
    Connected(ConnectionId),
    /// One datagram.
    Data(ConnectionId, Vec<u8>),
    /// Link closed by the remote side or the relay.
    Disconnected(ConnectionId),
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link is gone.
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
    /// The relay could not be reached.
    #[error("relay unreachable: {0}")]
    Unreachable(String),
    /// I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// WebSocket failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Link layer used by host and client.
pub trait Transport {
    /// Take the next newly accepted link, if any. Clients never accept.
    fn accept(&mut self) -> Option<ConnectionId>;

    /// Take the next pending event, if any.
    fn poll_event(&mut self) -> Option<TransportEvent>;

    /// Queue one datagram on a link.
    fn send(&mut self, conn: ConnectionId, data: Vec<u8>) -> Result<(), TransportError>;

    /// Close a link. Closing an already closed link does nothing.
    fn disconnect(&mut self, conn: ConnectionId);

    /// Whether a link is still open.
    fn is_alive(&self, conn: ConnectionId) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn accept(&mut self) -> Option<ConnectionId> {
        (**self).accept()
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        (**self).poll_event()
    }

    fn send(&mut self, conn: ConnectionId, data: Vec<u8>) -> Result<(), TransportError> {
        (**self).send(conn, data)
    }

    fn disconnect(&mut self, conn: ConnectionId) {
        (**self).disconnect(conn)
    }

    fn is_alive(&self, conn: ConnectionId) -> bool {
        (**self).is_alive(conn)
    }
}

/// Type-erased transport, so one session can run over any link layer.
pub type DynTransport = Box<dyn Transport + Send>;
