//! Logout, kick, idle timeout and destruction.
//!
//! ```text
//!   Active ──(logout request + delay | idle | kick | both connections closed)──→ LoggingOut
//!   LoggingOut ──(sequence done)──→ Active (recently logged out, no player)
//!   any ──(both connections closed AND (grace elapsed OR force exit))──→ Destroyed
//! ```
//!
//! The logout sequence runs at most once per attached player. It pumps a
//! pending map relocation (backing out if that fails), detaches the player from every interactive
//! system, saves it, removes it from the world and clears the link. Each
//! step isolates its own failure: a broken guild hook never stops the
//! player from being saved.

use std::time::Duration;

use realmgate_protocol::{ConnectionTag, ServerFrame};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::permissions::{IGNORE_IDLE_CONNECTION, INSTANT_LOGOUT};
use crate::{DetachStep, HookError, LoginState, PlayerLink, Session, UpdateStatus};

/// Consecutive failed relocations before the retry log turns into an error.
const RELOCATION_ESCALATE_AFTER: u32 = 5;

impl Session {
    // -- Logout -----------------------------------------------------------

    /// Records a client logout request. The world update completes it once
    /// the logout delay has passed.
    pub fn request_logout(&self, now: Instant) {
        let mut state = self.state.lock();
        if state.player.is_none() || state.logging_out {
            return;
        }
        state.logout_requested_at.get_or_insert(now);
        debug!(session = %self.id(), "logout requested");
    }

    pub fn cancel_logout_request(&self) {
        if self.state.lock().logout_requested_at.take().is_some() {
            debug!(session = %self.id(), "logout request cancelled");
        }
    }

    pub fn logout_pending(&self) -> bool {
        self.state.lock().logout_requested_at.is_some()
    }

    /// Runs the logout sequence now. A no-op while another logout is
    /// running or when no player is attached.
    ///
    /// A player stuck between maps stays attached and in the world: the
    /// sequence stops before detaching and the next world update retries
    /// the relocation.
    pub fn logout(&self) {
        let (mut link, requested_at) = {
            let mut state = self.state.lock();
            if state.logging_out {
                return;
            }
            let Some(link) = state.player else {
                return;
            };
            state.logging_out = true;
            (link, state.logout_requested_at.take())
        };
        info!(session = %self.id(), player = %link.guid, "logging out");

        let world = &self.ctx.services().world;

        if link.in_transfer() {
            match world.complete_relocation(&link) {
                Ok(map) => {
                    link.map = map;
                    link.transfer_to = None;
                    let mut state = self.state.lock();
                    if let Some(attached) = state.player.as_mut() {
                        *attached = link;
                    }
                }
                Err(err) => {
                    self.relocation_failed(&link, requested_at, &err);
                    return;
                }
            }
        }

        for step in DetachStep::ALL {
            if let Err(err) = world.detach(&link, step) {
                warn!(session = %self.id(), player = %link.guid, %step, error = %err, "detach step failed");
            }
        }

        if self.ctx.config().save_on_logout {
            if let Err(err) = world.save_player(&link) {
                error!(session = %self.id(), player = %link.guid, error = %err, "saving player failed");
            }
        }

        if let Err(err) = world.remove_player(&link) {
            error!(session = %self.id(), player = %link.guid, error = %err, "removing player from world failed");
        }

        let mut state = self.state.lock();
        state.player = None;
        state.login = LoginState::Authed;
        state.recently_logged_out = true;
        state.logging_out = false;
        state.relocation_failures = 0;
        drop(state);

        info!(session = %self.id(), player = %link.guid, "logged out");
    }

    /// Backs out of a logout whose relocation failed. The pending request
    /// is restored so the logout timer fires again on the next update.
    fn relocation_failed(&self, link: &PlayerLink, requested_at: Option<Instant>, err: &HookError) {
        let failures = {
            let mut state = self.state.lock();
            state.logging_out = false;
            if requested_at.is_some() {
                state.logout_requested_at = requested_at;
            }
            state.relocation_failures += 1;
            state.relocation_failures
        };
        if failures < RELOCATION_ESCALATE_AFTER {
            warn!(session = %self.id(), player = %link.guid, failures, error = %err, "relocation failed during logout, retrying next update");
        } else {
            error!(session = %self.id(), player = %link.guid, failures, error = %err, "player stuck in transfer, logout keeps failing");
        }
    }

    /// Whether a player is still attached because its relocation could
    /// not be completed.
    pub fn stuck_in_transfer(&self) -> bool {
        self.state.lock().relocation_failures > 0
    }

    // -- Kick / destroy ---------------------------------------------------

    /// Forces the session out: both connections close and the next world
    /// update logs out and destroys it without waiting for the grace
    /// period.
    pub fn kick(&self, reason: &str) {
        self.state.lock().force_exit = true;
        info!(session = %self.id(), reason, "kicking session");
        self.close_connection(ConnectionTag::Primary);
        self.close_connection(ConnectionTag::Secondary);
    }

    /// Tears the session down: logs out any attached player, discards the
    /// queues and cancels the session token. Idempotent.
    pub fn destroy(&self) {
        if self.is_destroyed() {
            return;
        }
        self.logout();
        if let Some(link) = self.player() {
            error!(session = %self.id(), player = %link.guid, "destroying session with player still in transfer");
        }

        // Flag first so a concurrent drain stops before the next packet.
        self.state.lock().destroyed = true;
        let discarded: usize = self.queues.iter().map(|queue| queue.clear()).sum();

        self.cancellation().cancel();
        self.close_connection(ConnectionTag::Primary);
        self.close_connection(ConnectionTag::Secondary);

        info!(session = %self.id(), discarded, "session destroyed");
    }

    // -- World-update timers ----------------------------------------------

    pub(crate) fn check_idle(&self, now: Instant) {
        if self.ctx.config().idle_timeout_secs == 0 {
            return;
        }
        let deadline = self.state.lock().idle_deadline;
        if now < deadline || !self.is_connected(ConnectionTag::Primary) {
            return;
        }
        if self.has_permission(IGNORE_IDLE_CONNECTION) {
            return;
        }
        info!(
            session = %self.id(),
            timeout_secs = self.ctx.config().idle_timeout_secs,
            "idle timeout, closing primary connection"
        );
        self.close_connection(ConnectionTag::Primary);
    }

    pub(crate) fn tick_clock_sync(&self, elapsed: Duration, now: Instant) {
        if !self.is_connected(ConnectionTag::Primary) {
            return;
        }
        let server_time = self.ctx.server_ms(now);
        let due = self.clock.lock().advance(elapsed, server_time);
        if let Some(counter) = due {
            self.send_frame(
                ConnectionTag::Primary,
                ServerFrame::TimeSync {
                    counter,
                    server_time,
                },
            );
        }
    }

    pub(crate) fn tick_logout_request(&self, now: Instant) {
        let Some(requested_at) = self.state.lock().logout_requested_at else {
            return;
        };
        let delay_over = now.saturating_duration_since(requested_at) >= self.ctx.config().logout_delay();
        if delay_over || self.has_permission(INSTANT_LOGOUT) {
            self.logout();
        }
    }

    /// Logs out and destroys a session whose connections are gone.
    pub(crate) fn evaluate_expiry(&self, now: Instant) -> UpdateStatus {
        let primary = self.is_connected(ConnectionTag::Primary);
        let secondary = self.is_connected(ConnectionTag::Secondary);

        if !primary && secondary {
            debug!(session = %self.id(), "primary connection gone, closing secondary");
            self.close_connection(ConnectionTag::Secondary);
        } else if primary {
            self.state.lock().disconnected_since = None;
            return UpdateStatus::Keep;
        }

        self.logout();
        if self.player().is_some() {
            // Relocation failed; destroying now would leak the player.
            return UpdateStatus::Keep;
        }

        let (since, force_exit) = {
            let mut state = self.state.lock();
            (*state.disconnected_since.get_or_insert(now), state.force_exit)
        };
        if force_exit || now.saturating_duration_since(since) >= self.ctx.config().expiry_grace() {
            self.destroy();
            return UpdateStatus::Destroyed;
        }
        UpdateStatus::Keep
    }
}
