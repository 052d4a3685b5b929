//! The session registry: every live session on the server.
//!
//! Responsibilities:
//! - Creating sessions when an account authenticates
//! - Looking sessions up by the session key a second (or resumed)
//!   connection presents
//! - Enforcing one session per account (a new login kicks the old one)
//! - Holding sessions in the login queue while the realm is full
//! - Forgetting sessions once the world loop has destroyed them
//!
//! # Concurrency note
//!
//! `SessionManager` is NOT thread-safe by itself; it uses plain
//! `HashMap`s. The server keeps it behind one mutex and only holds that
//! lock for bookkeeping. Updating sessions happens on a
//! [`snapshot`](SessionManager::snapshot) taken outside the lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use realmgate_protocol::AccountId;
use tracing::info;

use crate::{AccountIdentity, Session, SessionContext, SessionError, SessionId};

/// Registry of live sessions.
///
/// ## Lifecycle
///
/// ```text
/// create() ──→ [queued] ──admit_queued()──→ [active] ──destroyed──→ remove()
///    └────────────(realm not full)────────────↗
/// ```
pub struct SessionManager {
    ctx: Arc<SessionContext>,
    sessions: HashMap<SessionId, Arc<Session>>,
    /// Session key → id, kept in sync with `sessions`.
    keys: HashMap<String, SessionId>,
    accounts: HashMap<AccountId, SessionId>,
    login_queue: VecDeque<SessionId>,
    /// Active (non-queued) session limit. 0 means unlimited.
    max_active: usize,
    next_id: u64,
}

impl SessionManager {
    pub fn new(ctx: Arc<SessionContext>, max_active: usize) -> Self {
        Self {
            ctx,
            sessions: HashMap::new(),
            keys: HashMap::new(),
            accounts: HashMap::new(),
            login_queue: VecDeque::new(),
            max_active,
            next_id: 1,
        }
    }

    /// Creates a session for a freshly authenticated account.
    ///
    /// An existing session of the same account is kicked. When the realm
    /// is full the new session starts in the login queue.
    pub fn create(&mut self, identity: AccountIdentity) -> Arc<Session> {
        let account = identity.account;
        if let Some(previous) = self.accounts.get(&account).and_then(|id| self.sessions.get(id)) {
            previous.kick("account logged in again");
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;

        let session = Arc::new(Session::new(id, identity, Arc::clone(&self.ctx)));
        let queued = self.is_full();
        if queued {
            session.set_in_queue(true);
            self.login_queue.push_back(id);
            info!(session = %id, %account, position = self.login_queue.len(), "realm full, session queued");
        }

        self.keys.insert(session.key().to_owned(), id);
        self.accounts.insert(account, id);
        self.sessions.insert(id, Arc::clone(&session));
        session
    }

    /// Looks a session up by its session key.
    ///
    /// # Errors
    /// [`SessionError::InvalidSessionKey`] if no live session owns `key`.
    pub fn find_by_key(&self, key: &str) -> Result<Arc<Session>, SessionError> {
        self.keys
            .get(key)
            .and_then(|id| self.sessions.get(id))
            .filter(|session| !session.is_destroyed())
            .cloned()
            .ok_or(SessionError::InvalidSessionKey)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).cloned()
    }

    /// Forgets a session. Returns it if it was known.
    pub fn remove(&mut self, id: SessionId) -> Option<Arc<Session>> {
        let session = self.sessions.remove(&id)?;
        self.keys.remove(session.key());
        if self.accounts.get(&session.account()) == Some(&id) {
            self.accounts.remove(&session.account());
        }
        self.login_queue.retain(|queued| *queued != id);
        Some(session)
    }

    /// Clones every live session handle, for updating outside the lock.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.values().cloned().collect()
    }

    /// Releases queued sessions while there is room. Returns the sessions
    /// that were let in.
    pub fn admit_queued(&mut self) -> Vec<Arc<Session>> {
        let mut admitted = Vec::new();
        while !self.is_full() {
            let Some(id) = self.login_queue.pop_front() else {
                break;
            };
            let Some(session) = self.sessions.get(&id) else {
                continue;
            };
            if session.is_destroyed() {
                continue;
            }
            session.set_in_queue(false);
            info!(session = %id, "session admitted from login queue");
            admitted.push(Arc::clone(session));
        }
        admitted
    }

    /// 1-based position in the login queue.
    pub fn queue_position(&self, id: SessionId) -> Option<usize> {
        self.login_queue
            .iter()
            .position(|queued| *queued == id)
            .map(|index| index + 1)
    }

    /// Sessions not waiting in the login queue.
    pub fn active_count(&self) -> usize {
        self.sessions.len() - self.login_queue.len()
    }

    fn is_full(&self) -> bool {
        self.max_active != 0 && self.active_count() >= self.max_active
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================
