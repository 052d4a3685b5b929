//! Packet model and frame protocol for Realmgate.
//!
//! - **Types** ([`Packet`], [`Opcode`], [`ProcessingCategory`],
//!   [`ProtocolStatus`], ...): what the session pipeline dispatches on.
//! - **Frames** ([`ClientFrame`], [`ServerFrame`]): the envelope the
//!   bundled server speaks over WebSocket.
//! - **Codec** ([`Codec`], [`JsonCodec`]): frame serialization.
//!
//! ```text
//! Transport (bytes) → Protocol (frames, packets) → Session (dispatch)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    AccountId, ClientFrame, ConnectionTag, MapId, Opcode, Packet, PlayerGuid, ProcessingCategory,
    ProtocolStatus, ServerFrame,
};
