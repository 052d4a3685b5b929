//! # Realmgate
//!
//! Session gateway for a game server: accepts client connections,
//! authenticates them into sessions and routes every inbound packet
//! through a classification pool into per-session queues drained by the
//! world loop, per-map workers and an immediate loop.
//!
//! Game code plugs in at two seams:
//!
//! - an [`OpcodeRegistry`](realmgate_session::OpcodeRegistry) mapping each
//!   opcode to a handler, its processing category and the login state it
//!   needs;
//! - [`SessionServices`](realmgate_session::SessionServices): the world,
//!   ban, permission and anti-cheat collaborators.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use realmgate::prelude::*;
//!
//! // Implement Authenticator, register your handlers, then:
//! // let server = RealmgateServer::builder()
//! //     .bind("0.0.0.0:8085")
//! //     .registry(registry)
//! //     .build(my_auth)
//! //     .await?;
//! // server.run().await
//! ```

mod config;
mod connection;
mod error;
pub mod logging;
mod server;

pub use config::{ConfigError, ServerConfig};
pub use error::RealmgateError;
pub use server::{PROTOCOL_VERSION, RealmgateServer, RealmgateServerBuilder, ServerHandle};

/// Everything a realm binary usually needs.
pub mod prelude {
    pub use crate::{
        PROTOCOL_VERSION, RealmgateError, RealmgateServer, RealmgateServerBuilder, ServerConfig,
        ServerHandle,
    };
    pub use realmgate_protocol::{
        AccountId, ClientFrame, ConnectionTag, MapId, Opcode, Packet, PlayerGuid,
        ProcessingCategory, ProtocolStatus, ServerFrame,
    };
    pub use realmgate_session::{
        AbusePolicy, AccountIdentity, Authenticator, HandlerEntry, HandlerError, OpcodeRegistry,
        PayloadReader, PayloadWriter, Session, SessionConfig, SessionError, SessionOpcodes,
        SessionServices,
    };
}
