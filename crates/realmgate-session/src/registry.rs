//! The opcode table: what runs for each opcode, where, and under which
//! preconditions.
//!
//! Built once at startup with [`OpcodeRegistry::builder`] and shared
//! read-only (`Arc`) by the classification workers and every drain loop.
//!
//! ```
//! use realmgate_protocol::{Opcode, ProcessingCategory, ProtocolStatus};
//! use realmgate_session::{HandlerEntry, OpcodeRegistry};
//!
//! let registry = OpcodeRegistry::builder()
//!     .register(
//!         Opcode(0x01),
//!         HandlerEntry::new(
//!             "ping",
//!             ProcessingCategory::Immediate,
//!             ProtocolStatus::Authed,
//!             |_session, _packet| Ok(()),
//!         ),
//!     )
//!     .build();
//!
//! assert_eq!(
//!     registry.classify(Opcode(0x01)),
//!     Some(ProcessingCategory::Immediate)
//! );
//! assert!(registry.classify(Opcode(0x02)).is_none());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use realmgate_protocol::{ConnectionTag, Opcode, Packet, ProcessingCategory, ProtocolStatus};
use tracing::warn;

use crate::{HandlerError, Session};

/// A packet handler. Runs on whichever drain loop owns its category.
pub type Handler = Arc<dyn Fn(&Session, &Packet) -> Result<(), HandlerError> + Send + Sync>;

/// Registration record for one opcode.
#[derive(Clone)]
pub struct HandlerEntry {
    pub name: &'static str,
    pub category: ProcessingCategory,
    pub status: ProtocolStatus,
    /// Connection the packet must arrive on.
    pub connection: ConnectionTag,
    /// Fallback throttle limit, used when the config has no entry for
    /// this opcode.
    pub rate_limit: Option<u32>,
    /// Clears the session's recently-logged-out flag before the handler
    /// runs (only honoured for `Authed` handlers).
    pub clears_recent_logout: bool,
    handler: Handler,
}

impl HandlerEntry {
    /// A primary-connection handler with no rate limit.
    pub fn new<F>(
        name: &'static str,
        category: ProcessingCategory,
        status: ProtocolStatus,
        handler: F,
    ) -> Self
    where
        F: Fn(&Session, &Packet) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self {
            name,
            category,
            status,
            connection: ConnectionTag::Primary,
            rate_limit: None,
            clears_recent_logout: false,
            handler: Arc::new(handler),
        }
    }

    pub fn on_connection(mut self, connection: ConnectionTag) -> Self {
        self.connection = connection;
        self
    }

    pub fn rate_limit(mut self, max_per_second: u32) -> Self {
        self.rate_limit = Some(max_per_second);
        self
    }

    pub fn clears_recent_logout(mut self) -> Self {
        self.clears_recent_logout = true;
        self
    }

    pub(crate) fn invoke(&self, session: &Session, packet: &Packet) -> Result<(), HandlerError> {
        (self.handler)(session, packet)
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("status", &self.status)
            .field("connection", &self.connection)
            .field("rate_limit", &self.rate_limit)
            .field("clears_recent_logout", &self.clears_recent_logout)
            .finish_non_exhaustive()
    }
}

/// Immutable opcode → [`HandlerEntry`] table.
#[derive(Debug, Default)]
pub struct OpcodeRegistry {
    entries: HashMap<Opcode, HandlerEntry>,
}

impl OpcodeRegistry {
    pub fn builder() -> OpcodeRegistryBuilder {
        OpcodeRegistryBuilder::default()
    }

    pub fn get(&self, opcode: Opcode) -> Option<&HandlerEntry> {
        self.entries.get(&opcode)
    }

    /// The queue a packet with this opcode belongs in, or `None` for an
    /// unknown opcode.
    pub fn classify(&self, opcode: Opcode) -> Option<ProcessingCategory> {
        self.entries.get(&opcode).map(|entry| entry.category)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collects registrations, then freezes them into an `Arc<OpcodeRegistry>`.
#[derive(Default)]
pub struct OpcodeRegistryBuilder {
    entries: HashMap<Opcode, HandlerEntry>,
}

impl OpcodeRegistryBuilder {
    /// Adds a handler. Registering the same opcode twice keeps the later
    /// entry.
    pub fn register(mut self, opcode: Opcode, entry: HandlerEntry) -> Self {
        if let Some(previous) = self.entries.insert(opcode, entry) {
            warn!(%opcode, replaced = previous.name, "opcode registered twice");
        }
        self
    }

    pub fn build(self) -> Arc<OpcodeRegistry> {
        Arc::new(OpcodeRegistry {
            entries: self.entries,
        })
    }
}
