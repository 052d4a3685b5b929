//! The per-client session object.
//!
//! A [`Session`] is created once the login handshake authenticates an
//! account and lives until both of its connections are gone and it has
//! been destroyed. It is shared as `Arc<Session>` between:
//!
//! - the connection reader tasks (which feed the classification pool),
//! - the world loop (WorldTick drain, timers, destruction),
//! - the map worker hosting the attached player (MapTick drain),
//! - the immediate loop (Immediate drain).
//!
//! Internal state sits behind short-lived `parking_lot` locks. No lock is
//! held while a handler or a collaborator hook runs, so handlers are free
//! to call back into the session.
//!
//! ```text
//!   Authed ──begin_login──→ LoggedInPending ──attach_player──→ LoggedIn
//!     ↑                                                          │
//!     └──────────────────────── logout ──────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use realmgate_protocol::{
    AccountId, ConnectionTag, MapId, Opcode, PlayerGuid, ProcessingCategory, ServerFrame,
};
use realmgate_transport::ConnectionId;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::{ClockSample, ClockSync};
use crate::permissions::PermissionCache;
use crate::queue::PacketQueue;
use crate::{
    AccountIdentity, AntiAbuseGuard, PermissionId, PermissionSet, SessionContext, SessionError,
    SocketHandle,
};

// ---------------------------------------------------------------------------
// Identifiers and small value types
// ---------------------------------------------------------------------------

/// Process-unique session number. Also picks the classification worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// The session's link to the player entity it controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerLink {
    pub guid: PlayerGuid,
    /// Map the player is on (the origin while a transfer is pending).
    pub map: MapId,
    /// Destination of a pending map relocation.
    pub transfer_to: Option<MapId>,
}

impl PlayerLink {
    pub fn new(guid: PlayerGuid, map: MapId) -> Self {
        Self {
            guid,
            map,
            transfer_to: None,
        }
    }

    pub fn in_transfer(&self) -> bool {
        self.transfer_to.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    /// Authenticated, no player selected.
    Authed,
    /// World entry requested, player not attached yet. Player-scoped
    /// packets are deferred in this state.
    LoggedInPending,
    LoggedIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    LoggingOut,
    Destroyed,
}

/// What the world loop should do with a session after updating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Keep,
    /// The session was destroyed during this update; drop every reference.
    Destroyed,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) login: LoginState,
    pub(crate) player: Option<PlayerLink>,
    pub(crate) logging_out: bool,
    pub(crate) recently_logged_out: bool,
    pub(crate) force_exit: bool,
    pub(crate) in_queue: bool,
    pub(crate) destroyed: bool,
    pub(crate) idle_deadline: Instant,
    pub(crate) logout_requested_at: Option<Instant>,
    pub(crate) disconnected_since: Option<Instant>,
    /// Consecutive logouts that could not relocate the player.
    pub(crate) relocation_failures: u32,
}

pub struct Session {
    id: SessionId,
    key: String,
    identity: AccountIdentity,
    pub(crate) ctx: Arc<SessionContext>,
    sockets: Mutex<[Option<SocketHandle>; 2]>,
    pub(crate) queues: [PacketQueue; 3],
    pub(crate) state: Mutex<SessionState>,
    pub(crate) guard: Mutex<AntiAbuseGuard>,
    pub(crate) clock: Mutex<ClockSync>,
    permissions: PermissionCache,
    pub(crate) next_seq: AtomicU64,
    cancel: CancellationToken,
}

impl Session {
    /// Creates a session with no connections attached. The caller attaches
    /// the primary socket right after.
    pub fn new(id: SessionId, identity: AccountIdentity, ctx: Arc<SessionContext>) -> Self {
        let now = Instant::now();
        let config = ctx.config();
        let clock = ClockSync::new(
            Duration::from_secs(config.time_sync_first_secs),
            Duration::from_secs(config.time_sync_interval_secs),
        );
        let state = SessionState {
            login: LoginState::Authed,
            player: None,
            logging_out: false,
            recently_logged_out: false,
            force_exit: false,
            in_queue: false,
            destroyed: false,
            idle_deadline: now + config.idle_timeout(),
            logout_requested_at: None,
            disconnected_since: None,
            relocation_failures: 0,
        };

        info!(session = %id, account = %identity.account, addr = %identity.remote_addr, "session created");

        Self {
            id,
            key: generate_key(),
            identity,
            ctx,
            sockets: Mutex::new([None, None]),
            queues: Default::default(),
            state: Mutex::new(state),
            guard: Mutex::new(AntiAbuseGuard::new()),
            clock: Mutex::new(clock),
            permissions: PermissionCache::default(),
            next_seq: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Secret a second connection presents to join this session.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn identity(&self) -> &AccountIdentity {
        &self.identity
    }

    pub fn account(&self) -> AccountId {
        self.identity.account
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Cancelled when the session is destroyed; connection tasks select
    /// on it.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // -- Connections ------------------------------------------------------

    /// Installs the socket for `tag`, closing whatever was there before.
    pub fn attach_socket(&self, tag: ConnectionTag, socket: SocketHandle) {
        let previous = self.sockets.lock()[tag.index()].replace(socket);
        if let Some(previous) = previous {
            debug!(session = %self.id, %tag, old = %previous.id(), "replacing connection");
            previous.close();
        }
        let mut state = self.state.lock();
        state.disconnected_since = None;
        if tag == ConnectionTag::Primary {
            state.idle_deadline = Instant::now() + self.ctx.config().idle_timeout();
        }
    }

    /// Called by a reader task when its connection ended. Ignored if the
    /// slot has already been given to a newer connection.
    pub fn connection_lost(&self, tag: ConnectionTag, id: ConnectionId) {
        let mut sockets = self.sockets.lock();
        let slot = &mut sockets[tag.index()];
        if slot.as_ref().is_some_and(|s| s.id() == id) {
            if let Some(socket) = slot.take() {
                socket.mark_closed();
            }
            debug!(session = %self.id, %tag, conn = %id, "connection lost");
        }
    }

    /// Closes the connection on `tag`, if any.
    pub fn close_connection(&self, tag: ConnectionTag) {
        let socket = self.sockets.lock()[tag.index()].take();
        if let Some(socket) = socket {
            debug!(session = %self.id, %tag, conn = %socket.id(), "closing connection");
            socket.close();
        }
    }

    pub fn is_connected(&self, tag: ConnectionTag) -> bool {
        self.sockets.lock()[tag.index()]
            .as_ref()
            .is_some_and(SocketHandle::is_open)
    }

    /// Sends a frame on `tag`. Returns `false` if that connection is gone.
    pub fn send_frame(&self, tag: ConnectionTag, frame: ServerFrame) -> bool {
        let socket = self.sockets.lock()[tag.index()].clone();
        socket.is_some_and(|s| s.send(frame))
    }

    /// Sends a handler response on the primary connection.
    pub fn send_packet(&self, opcode: Opcode, payload: Vec<u8>) -> bool {
        self.send_frame(ConnectionTag::Primary, ServerFrame::Packet { opcode, payload })
    }

    // -- State queries ----------------------------------------------------

    pub fn player(&self) -> Option<PlayerLink> {
        self.state.lock().player
    }

    /// The map whose worker drains this session's MapTick queue: the
    /// player's map, unless there is no player or it is relocating.
    pub fn map_assignment(&self) -> Option<MapId> {
        self.state
            .lock()
            .player
            .filter(|link| !link.in_transfer())
            .map(|link| link.map)
    }

    pub fn login_state(&self) -> LoginState {
        self.state.lock().login
    }

    pub fn lifecycle(&self) -> Lifecycle {
        let state = self.state.lock();
        if state.destroyed {
            Lifecycle::Destroyed
        } else if state.logging_out {
            Lifecycle::LoggingOut
        } else {
            Lifecycle::Active
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    pub fn recently_logged_out(&self) -> bool {
        self.state.lock().recently_logged_out
    }

    pub fn is_force_exit(&self) -> bool {
        self.state.lock().force_exit
    }

    pub fn is_in_queue(&self) -> bool {
        self.state.lock().in_queue
    }

    /// Marks the session as waiting in (or released from) the login queue.
    pub fn set_in_queue(&self, in_queue: bool) {
        self.state.lock().in_queue = in_queue;
    }

    /// Packets waiting in one of the queues.
    pub fn queued(&self, category: ProcessingCategory) -> usize {
        self.queues[category.index()].len()
    }

    /// Pushes the idle deadline out by the idle timeout.
    pub fn touch(&self, now: Instant) {
        self.state.lock().idle_deadline = now + self.ctx.config().idle_timeout();
    }

    // -- Player ----------------------------------------------------------

    /// Starts world entry. Player-scoped packets are deferred from now on
    /// until [`attach_player`](Self::attach_player).
    pub fn begin_login(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        self.check_can_enter(&state)?;
        state.login = LoginState::LoggedInPending;
        Ok(())
    }

    /// Links the session to the player entity that entered the world.
    pub fn attach_player(&self, guid: PlayerGuid, map: MapId) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        self.check_can_enter(&state)?;
        state.player = Some(PlayerLink::new(guid, map));
        state.login = LoginState::LoggedIn;
        state.recently_logged_out = false;
        drop(state);

        info!(session = %self.id, player = %guid, %map, "player entered world");
        Ok(())
    }

    fn check_can_enter(&self, state: &SessionState) -> Result<(), SessionError> {
        if state.destroyed {
            return Err(SessionError::Destroyed(self.id));
        }
        if state.logging_out {
            return Err(SessionError::LoggingOut(self.id));
        }
        if let Some(link) = state.player {
            return Err(SessionError::PlayerAlreadyAttached {
                session: self.id,
                attached: link.guid,
            });
        }
        Ok(())
    }

    /// Starts relocating the attached player to `destination`. The MapTick
    /// queue falls back to the world loop until the transfer completes.
    pub fn begin_transfer(&self, destination: MapId) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let link = state
            .player
            .as_mut()
            .ok_or(SessionError::NoPlayerAttached(self.id))?;
        link.transfer_to = Some(destination);
        debug!(session = %self.id, from = %link.map, to = %destination, "transfer started");
        Ok(())
    }

    /// Finishes the pending relocation; returns the new map.
    pub fn complete_transfer(&self) -> Result<MapId, SessionError> {
        let mut state = self.state.lock();
        let link = state
            .player
            .as_mut()
            .ok_or(SessionError::NoPlayerAttached(self.id))?;
        let destination = link
            .transfer_to
            .take()
            .ok_or(SessionError::NotInTransfer(self.id))?;
        link.map = destination;
        state.relocation_failures = 0;
        debug!(session = %self.id, map = %destination, "transfer completed");
        Ok(destination)
    }

    // -- Permissions ------------------------------------------------------

    pub fn permissions(&self) -> Arc<PermissionSet> {
        self.permissions
            .get(self.ctx.services().permissions.as_ref(), &self.identity)
    }

    pub fn has_permission(&self, id: PermissionId) -> bool {
        self.permissions().contains(id)
    }

    /// Drops the snapshot; the next check reloads it.
    pub fn invalidate_permissions(&self) {
        self.permissions.invalidate();
    }

    // -- Clock sync -------------------------------------------------------

    /// Feeds a client's time-sync response into the clock estimate.
    pub fn handle_time_sync(&self, counter: u32, client_ms: u64) -> Result<ClockSample, SessionError> {
        let server_ms = self.ctx.server_ms(Instant::now());
        self.clock.lock().on_response(counter, client_ms, server_ms)
    }

    /// Estimated server-minus-client clock offset in milliseconds.
    pub fn clock_delta_ms(&self) -> Option<i64> {
        self.clock.lock().delta_ms()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("account", &self.identity.account)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

/// 32 hex characters (128 bits) from the thread RNG.
fn generate_key() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
