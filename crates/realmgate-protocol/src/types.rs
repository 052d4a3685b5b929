//! Core protocol types: the packet model and the dispatch vocabulary.
//!
//! A [`Packet`] is what the session pipeline moves around. Whether a
//! packet may run, and where, is decided by two small enums attached to
//! its opcode in the handler registry:
//!
//! - [`ProcessingCategory`]: which execution context runs the handler.
//! - [`ProtocolStatus`]: what the session must look like before it may run.
//!
//! The frame types at the bottom of this module are the thin envelope the
//! bundled WebSocket server speaks. They carry opaque opcode payloads and
//! define no game messages.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Numeric identifier of a packet's message type.
///
/// Serialized as a plain number (`#[serde(transparent)]`), displayed in
/// hex the way opcode tables are usually written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Opcode(pub u16);

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Account identifier, assigned by the external authentication service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A-{}", self.0)
    }
}

/// Identifier of a player entity living in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerGuid(pub u64);

impl fmt::Display for PlayerGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Player-{}", self.0)
    }
}

/// Identifier of a map (a simulation partition with its own update loop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapId(pub u32);

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Dispatch vocabulary
// ---------------------------------------------------------------------------

/// Which of the session's two logical connections a packet travelled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionTag {
    /// The connection opened by the login handshake.
    #[default]
    Primary,
    /// The optional second connection joined with the session key.
    Secondary,
}

impl ConnectionTag {
    /// Index into a two-slot connection array.
    pub fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
        }
    }
}

impl fmt::Display for ConnectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Where a packet's handler must run.
///
/// Each variant corresponds to one of the session's three queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingCategory {
    /// Only on the authoritative simulation tick.
    WorldTick,
    /// On the per-map worker, concurrently with the world tick.
    MapTick,
    /// As soon as possible on the dedicated immediate loop.
    Immediate,
}

impl ProcessingCategory {
    /// All categories, in queue-index order.
    pub const ALL: [Self; 3] = [Self::WorldTick, Self::MapTick, Self::Immediate];

    /// Index of the queue that holds packets of this category.
    pub fn index(self) -> usize {
        match self {
            Self::WorldTick => 0,
            Self::MapTick => 1,
            Self::Immediate => 2,
        }
    }
}

impl fmt::Display for ProcessingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorldTick => write!(f, "world-tick"),
            Self::MapTick => write!(f, "map-tick"),
            Self::Immediate => write!(f, "immediate"),
        }
    }
}

/// Precondition on session state that must hold before a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolStatus {
    /// Authenticated, and not waiting in the login queue.
    Authed,
    /// A player entity is attached and in the world.
    LoggedIn,
    /// A player is attached, or one was just logged out.
    LoggedInOrRecentlyLoggedOut,
    /// The attached player is in the middle of a map relocation.
    Transfer,
}

impl fmt::Display for ProtocolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authed => write!(f, "authed"),
            Self::LoggedIn => write!(f, "logged-in"),
            Self::LoggedInOrRecentlyLoggedOut => write!(f, "logged-in-or-recently-logged-out"),
            Self::Transfer => write!(f, "transfer"),
        }
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// One inbound message, immutable once built.
///
/// `seq` is the arrival sequence number assigned by the session's
/// classification worker. It is unique within a session and defines FIFO
/// order inside a queue; it also serves as the packet's identity when the
/// drain loop checks whether a deferred packet has come back around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    opcode: Opcode,
    tag: ConnectionTag,
    payload: Vec<u8>,
    seq: u64,
}

impl Packet {
    pub fn new(opcode: Opcode, tag: ConnectionTag, payload: Vec<u8>, seq: u64) -> Self {
        Self {
            opcode,
            tag,
            payload,
            seq,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// The connection this packet arrived on.
    pub fn tag(&self) -> ConnectionTag {
        self.tag
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Frames a client sends over a connection.
///
/// The first frame on a connection decides its role: `Hello` opens a new
/// session on the primary connection, `JoinSecondary` attaches a second
/// connection to an existing session and `Reconnect` gives a session that
/// lost its primary connection a new one. Everything after that is
/// `Packet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    Hello { version: u32, token: String },
    JoinSecondary { version: u32, session_key: String },
    Reconnect { version: u32, session_key: String },
    Packet { opcode: Opcode, payload: Vec<u8> },
}

/// Frames the server sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Handshake accepted. `session_key` lets a second connection join.
    Welcome {
        account: AccountId,
        session_key: String,
        server_time: u64,
    },
    /// A secondary connection was attached to the session.
    SecondaryAccepted,
    /// The realm is full; the session waits at `position` (1-based).
    Queued { position: u32 },
    /// The session left the login queue.
    Admitted,
    /// Clock-sync request; the client echoes `counter` with its own clock.
    TimeSync { counter: u32, server_time: u64 },
    /// Handler output.
    Packet { opcode: Opcode, payload: Vec<u8> },
    /// HTTP-style status code plus message; the connection closes after it.
    Error { code: u16, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_serializes_as_plain_number() {
        let json = serde_json::to_string(&Opcode(0x1d2)).unwrap();
        assert_eq!(json, "466");
    }

    #[test]
    fn test_opcode_display_is_hex() {
        assert_eq!(Opcode(0x4a).to_string(), "0x004A");
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(AccountId(9).to_string(), "A-9");
        assert_eq!(PlayerGuid(12).to_string(), "Player-12");
        assert_eq!(MapId(530).to_string(), "M-530");
    }

    #[test]
    fn test_category_indices_are_distinct() {
        let idx: Vec<usize> = ProcessingCategory::ALL.iter().map(|c| c.index()).collect();
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn test_connection_tag_default_is_primary() {
        assert_eq!(ConnectionTag::default(), ConnectionTag::Primary);
        assert_eq!(ConnectionTag::Secondary.index(), 1);
    }

    #[test]
    fn test_packet_accessors() {
        let p = Packet::new(Opcode(7), ConnectionTag::Secondary, vec![1, 2], 41);
        assert_eq!(p.opcode(), Opcode(7));
        assert_eq!(p.tag(), ConnectionTag::Secondary);
        assert_eq!(p.payload(), &[1, 2]);
        assert_eq!(p.seq(), 41);
    }

    #[test]
    fn test_client_frame_is_internally_tagged() {
        let frame = ClientFrame::Hello {
            version: 1,
            token: "42".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "Hello");
        assert_eq!(json["version"], 1);
        assert_eq!(json["token"], "42");
    }

    #[test]
    fn test_client_packet_frame_parses_from_json() {
        let raw = r#"{"type":"Packet","opcode":16,"payload":[9,9]}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Packet {
                opcode: Opcode(16),
                payload: vec![9, 9]
            }
        );
    }

    #[test]
    fn test_server_time_sync_frame_shape() {
        let json: serde_json::Value = serde_json::to_value(ServerFrame::TimeSync {
            counter: 3,
            server_time: 5000,
        })
        .unwrap();
        assert_eq!(json["type"], "TimeSync");
        assert_eq!(json["counter"], 3);
        assert_eq!(json["server_time"], 5000);
    }
}
