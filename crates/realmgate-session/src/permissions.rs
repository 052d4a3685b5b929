//! Account permissions.
//!
//! A session loads its [`PermissionSet`] lazily on the first check and
//! keeps it as an immutable `Arc` snapshot. Invalidation swaps the whole
//! snapshot out; readers holding the old one keep a consistent view.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use realmgate_protocol::AccountId;
use serde::{Deserialize, Serialize};

use crate::AccountIdentity;

/// Numeric permission identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionId(pub u32);

impl fmt::Display for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "perm-{}", self.0)
    }
}

/// The session is never closed for inactivity.
pub const IGNORE_IDLE_CONNECTION: PermissionId = PermissionId(1);
/// Logout requests complete on the next world update instead of after
/// the logout delay.
pub const INSTANT_LOGOUT: PermissionId = PermissionId(2);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    granted: HashSet<PermissionId>,
}

impl PermissionSet {
    pub fn contains(&self, id: PermissionId) -> bool {
        self.granted.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.granted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }
}

impl FromIterator<PermissionId> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = PermissionId>>(iter: I) -> Self {
        Self {
            granted: iter.into_iter().collect(),
        }
    }
}

/// Source of account permissions (a database, a config file, ...).
pub trait PermissionProvider: Send + Sync + 'static {
    fn load(&self, account: AccountId, security_level: u8) -> PermissionSet;
}

/// Grants nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPermissions;

impl PermissionProvider for NoPermissions {
    fn load(&self, _account: AccountId, _security_level: u8) -> PermissionSet {
        PermissionSet::default()
    }
}

/// Grants the same set to everyone above a security level.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    pub min_security_level: u8,
    pub granted: PermissionSet,
}

impl PermissionProvider for StaticPermissions {
    fn load(&self, _account: AccountId, security_level: u8) -> PermissionSet {
        if security_level >= self.min_security_level {
            self.granted.clone()
        } else {
            PermissionSet::default()
        }
    }
}

/// Lazily loaded, wholesale-replaced permission snapshot.
#[derive(Debug, Default)]
pub(crate) struct PermissionCache {
    snapshot: RwLock<Option<Arc<PermissionSet>>>,
}

impl PermissionCache {
    pub(crate) fn get(
        &self,
        provider: &dyn PermissionProvider,
        identity: &AccountIdentity,
    ) -> Arc<PermissionSet> {
        if let Some(snapshot) = self.snapshot.read().as_ref() {
            return Arc::clone(snapshot);
        }
        // Load outside the lock; a concurrent loader may win the race,
        // in which case its snapshot is kept.
        let loaded = Arc::new(provider.load(identity.account, identity.security_level));
        let mut slot = self.snapshot.write();
        Arc::clone(slot.get_or_insert(loaded))
    }

    pub(crate) fn invalidate(&self) {
        *self.snapshot.write() = None;
    }
}
