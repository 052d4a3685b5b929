//! The session packet pipeline for Realmgate.
//!
//! Every inbound packet goes through four stages:
//!
//! 1. **Classification**: the [`Dispatcher`] looks the opcode up in the
//!    [`OpcodeRegistry`] and puts the packet on one of the session's three
//!    queues (WorldTick, MapTick or Immediate).
//! 2. **Draining**: the world loop, the player's map worker and the
//!    immediate loop each drain their queue, bounded per call.
//! 3. **Gating**: before a handler runs, the drain checks the connection
//!    the packet came in on, the session's login state (deferring packets
//!    that arrive before the player is in the world) and the per-opcode
//!    rate limit.
//! 4. **Handling**: the handler runs with errors and panics contained to
//!    the packet.
//!
//! Around that sits the [`Session`] lifecycle: login, map transfer,
//! logout, kick, idle timeout, clock sync and destruction.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server (above)   ← accepts connections, runs the world and immediate loops
//! Map workers      ← drain MapTick queues once per map update
//!     ↕
//! Session Layer (this crate)
//!     ↕
//! Protocol Layer (below)  ← Packet, Opcode, ProcessingCategory, ProtocolStatus
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod builtin;
mod clock;
mod config;
mod context;
mod dispatch;
mod drain;
mod error;
mod gate;
mod lifecycle;
mod manager;
mod payload;
pub mod permissions;
mod queue;
mod registry;
mod services;
mod session;
mod socket;
mod throttle;

pub use auth::{AccountIdentity, Authenticator};
pub use builtin::SessionOpcodes;
pub use clock::{CLOCK_SAMPLE_WINDOW, ClockSample, ClockSync};
pub use config::{AbusePolicy, BanScope, OpcodeLimit, SessionConfig};
pub use context::SessionContext;
pub use dispatch::{Dispatcher, InboundFrame};
pub use drain::DrainReport;
pub use error::{HandlerError, HookError, SessionError};
pub use manager::SessionManager;
pub use payload::{PayloadReader, PayloadWriter};
pub use permissions::{NoPermissions, PermissionId, PermissionProvider, PermissionSet, StaticPermissions};
pub use registry::{Handler, HandlerEntry, OpcodeRegistry, OpcodeRegistryBuilder};
pub use services::{
    AntiCheat, BanRequest, BanService, BanTarget, DetachStep, DetachedWorld, LogOnlyBans,
    NoAntiCheat, SessionServices, WorldHooks,
};
pub use session::{Lifecycle, LoginState, PlayerLink, Session, SessionId, UpdateStatus};
pub use socket::{Outbound, SocketHandle};
pub use throttle::{AntiAbuseGuard, ThrottleVerdict};
