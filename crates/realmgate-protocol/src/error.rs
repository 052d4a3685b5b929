//! Frame encoding and handshake errors.

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[cfg(feature = "json")]
    #[error("cannot encode frame: {0}")]
    Encode(serde_json::Error),

    /// Bytes that are not a known frame.
    #[cfg(feature = "json")]
    #[error("cannot decode frame: {0}")]
    Decode(serde_json::Error),

    #[error("client speaks protocol {got}, server speaks {expected}")]
    VersionMismatch { expected: u32, got: u32 },

    /// The connection did not produce a usable first frame.
    #[error("handshake failed: {0}")]
    Handshake(String),
}
