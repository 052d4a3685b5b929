//! Error types for the session layer.
//!
//! Three enums, one per audience:
//! - [`SessionError`]: returned by session and manager operations to the
//!   server and to handlers.
//! - [`HandlerError`]: returned by packet handlers. The drain loop logs it
//!   and moves on to the next packet; it never ends the session.
//! - [`HookError`]: returned by the world collaborator during logout.
//!   Each logout step isolates its own failure.

use realmgate_protocol::PlayerGuid;

use crate::SessionId;

/// Errors from session lifecycle and bookkeeping operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The [`Authenticator`](crate::Authenticator) rejected the token.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// No live session with this id.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// A secondary connection presented a key no live session owns.
    #[error("invalid session key")]
    InvalidSessionKey,

    /// The session already controls a player; a session holds at most one.
    #[error("session {session} already has player {attached} attached")]
    PlayerAlreadyAttached {
        session: SessionId,
        attached: PlayerGuid,
    },

    /// The operation needs an attached player.
    #[error("session {0} has no player attached")]
    NoPlayerAttached(SessionId),

    /// The attached player is not relocating between maps.
    #[error("session {0} is not in transfer")]
    NotInTransfer(SessionId),

    /// A logout sequence is running; world entry has to wait.
    #[error("session {0} is logging out")]
    LoggingOut(SessionId),

    /// The session was torn down.
    #[error("session {0} is destroyed")]
    Destroyed(SessionId),

    /// A time-sync response carried a counter the server never sent (or
    /// already consumed).
    #[error("unknown time-sync counter {0}")]
    UnknownTimeSyncCounter(u32),

    /// The classification pool has shut down.
    #[error("dispatcher is closed")]
    DispatcherClosed,
}

/// A packet handler failed. Scoped to the packet that caused it.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The payload ended before a field could be read.
    #[error("payload truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// The payload is structurally wrong (bad enum tag, invalid UTF-8, ...).
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The packet is well-formed but the handler refuses it in the
    /// current game state.
    #[error("rejected: {0}")]
    Rejected(String),

    /// A session operation the handler called failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// A world collaborator hook failed during logout.
#[derive(Debug, thiserror::Error)]
#[error("{hook} failed: {reason}")]
pub struct HookError {
    pub hook: &'static str,
    pub reason: String,
}

impl HookError {
    pub fn new(hook: &'static str, reason: impl Into<String>) -> Self {
        Self {
            hook,
            reason: reason.into(),
        }
    }
}
