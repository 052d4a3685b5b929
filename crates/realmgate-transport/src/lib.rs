//! Network edge of Realmgate.
//!
//! Sessions never see sockets. The server crate accepts a [`Connection`]
//! from a [`Transport`] and then runs two tasks on it: a reader blocked in
//! [`Connection::recv`] and a writer flushing outbound frames with
//! [`Connection::send`]. Both run at once, so implementations must not
//! serialise the two directions behind one lock.
//!
//! Frames are opaque byte buffers here; decoding them is the protocol
//! crate's job.
//!
//! # Feature Flags
//!
//! - `websocket` (default): [`WebSocketTransport`] over `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one accepted socket for the life of the process.
///
/// A session compares the id a reader task reports on exit with the id
/// currently attached, so a stale disconnect never detaches a newer
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocates a fresh process-wide id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Source of new connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Resolves with the next client that completed the transport-level
    /// handshake.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

/// One client socket carrying whole frames in both directions.
///
/// `recv` may be pending in one task while another task calls `send` or
/// `close`.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    async fn send(&self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Next frame, or `Ok(None)` once the peer closed cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Idempotent.
    async fn close(&self) -> Result<(), Self::Error>;

    fn id(&self) -> ConnectionId;

    /// Feeds IP-scoped bans and log fields.
    fn peer_addr(&self) -> SocketAddr;
}
