//! Collaborators the pipeline calls out to.
//!
//! The session layer does not own the simulation, the ban list or the
//! anti-cheat system. It reaches them through these traits, bundled in
//! [`SessionServices`] and injected at startup. Every trait has a
//! do-nothing implementation so a server (or a test) only supplies the
//! parts it cares about.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use realmgate_protocol::{AccountId, MapId, PlayerGuid};
use tracing::warn;

use crate::{HookError, NoPermissions, PermissionProvider, PlayerLink, Session};

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Interactive state a player is pulled out of during logout, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetachStep {
    Interactions,
    Trade,
    Loot,
    Group,
    Guild,
    Social,
}

impl DetachStep {
    pub const ALL: [Self; 6] = [
        Self::Interactions,
        Self::Trade,
        Self::Loot,
        Self::Group,
        Self::Guild,
        Self::Social,
    ];
}

impl fmt::Display for DetachStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Interactions => "interactions",
            Self::Trade => "trade",
            Self::Loot => "loot",
            Self::Group => "group",
            Self::Guild => "guild",
            Self::Social => "social",
        };
        f.write_str(name)
    }
}

/// The simulation side of logout.
pub trait WorldHooks: Send + Sync + 'static {
    /// Finishes a pending map relocation and returns the map the player
    /// ended up on.
    fn complete_relocation(&self, link: &PlayerLink) -> Result<MapId, HookError>;

    fn detach(&self, link: &PlayerLink, step: DetachStep) -> Result<(), HookError>;

    fn save_player(&self, link: &PlayerLink) -> Result<(), HookError>;

    fn remove_player(&self, link: &PlayerLink) -> Result<(), HookError>;
}

/// World hooks for a server without a simulation attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedWorld;

impl WorldHooks for DetachedWorld {
    fn complete_relocation(&self, link: &PlayerLink) -> Result<MapId, HookError> {
        Ok(link.transfer_to.unwrap_or(link.map))
    }

    fn detach(&self, _link: &PlayerLink, _step: DetachStep) -> Result<(), HookError> {
        Ok(())
    }

    fn save_player(&self, _link: &PlayerLink) -> Result<(), HookError> {
        Ok(())
    }

    fn remove_player(&self, _link: &PlayerLink) -> Result<(), HookError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanTarget {
    Account(AccountId),
    Character(PlayerGuid),
    Ip(IpAddr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRequest {
    pub target: BanTarget,
    pub duration: Duration,
    pub reason: String,
    pub author: &'static str,
}

pub trait BanService: Send + Sync + 'static {
    fn issue_ban(&self, request: BanRequest);
}

/// Logs ban requests without enforcing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyBans;

impl BanService for LogOnlyBans {
    fn issue_ban(&self, request: BanRequest) {
        warn!(
            target = ?request.target,
            duration_secs = request.duration.as_secs(),
            reason = %request.reason,
            "ban requested but no ban service is configured"
        );
    }
}

// ---------------------------------------------------------------------------
// Anti-cheat
// ---------------------------------------------------------------------------

/// Called once per world update of every session.
pub trait AntiCheat: Send + Sync + 'static {
    fn update(&self, session: &Session, elapsed: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoAntiCheat;

impl AntiCheat for NoAntiCheat {
    fn update(&self, _session: &Session, _elapsed: Duration) {}
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SessionServices {
    pub world: Arc<dyn WorldHooks>,
    pub bans: Arc<dyn BanService>,
    pub permissions: Arc<dyn PermissionProvider>,
    pub anti_cheat: Arc<dyn AntiCheat>,
}

impl Default for SessionServices {
    fn default() -> Self {
        Self {
            world: Arc::new(DetachedWorld),
            bans: Arc::new(LogOnlyBans),
            permissions: Arc::new(NoPermissions),
            anti_cheat: Arc::new(NoAntiCheat),
        }
    }
}

impl SessionServices {
    pub fn with_world(mut self, world: impl WorldHooks) -> Self {
        self.world = Arc::new(world);
        self
    }

    pub fn with_bans(mut self, bans: impl BanService) -> Self {
        self.bans = Arc::new(bans);
        self
    }

    pub fn with_permissions(mut self, permissions: impl PermissionProvider) -> Self {
        self.permissions = Arc::new(permissions);
        self
    }

    pub fn with_anti_cheat(mut self, anti_cheat: impl AntiCheat) -> Self {
        self.anti_cheat = Arc::new(anti_cheat);
        self
    }
}

impl fmt::Debug for SessionServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionServices").finish_non_exhaustive()
    }
}
