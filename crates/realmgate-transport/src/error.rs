use std::io;

use crate::ConnectionId;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// `send` after `close`.
    #[error("{0} is closed")]
    Closed(ConnectionId),

    #[error("failed to write frame: {0}")]
    Write(#[source] io::Error),

    /// Reset or corrupt framing.
    #[error("failed to read frame: {0}")]
    Read(#[source] io::Error),

    /// Listener bind or accept failure.
    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),
}
