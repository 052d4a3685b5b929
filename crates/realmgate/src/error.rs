//! The server's error type: one variant per crate below it.

use realmgate_map::MapError;
use realmgate_protocol::ProtocolError;
use realmgate_session::SessionError;
use realmgate_transport::TransportError;

use crate::ConfigError;

/// Anything that can end a server operation or a connection task.
/// `?` lifts every crate error into it.
#[derive(Debug, thiserror::Error)]
pub enum RealmgateError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded, or broke the handshake.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Authentication, session lookup or player state.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Map(#[from] MapError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
