//! Draining a session's queues.
//!
//! Each of the three update schedules calls into the session:
//!
//! | schedule        | entry point                     | queues drained                  |
//! |-----------------|---------------------------------|---------------------------------|
//! | world tick      | [`Session::update_world`]       | WorldTick, MapTick if no map    |
//! | map worker tick | [`Session::update_map`]         | MapTick                         |
//! | immediate loop  | [`Session::drain_immediate`]    | Immediate                       |
//!
//! Every drain takes at most `packets_per_drain_cap` packets and checks,
//! for each one, in order: the connection it arrived on, the protocol-status
//! gate, and the throttle. Only then does the handler run.
//!
//! A packet deferred by the status gate goes back to the tail of its queue.
//! The drain remembers the first one it deferred and stops as soon as that
//! packet is at the head again, so a deferred packet is looked at no more
//! than twice per call.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use realmgate_protocol::{ConnectionTag, Packet, ProcessingCategory, ProtocolStatus};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::gate::{self, GateDecision, GateView};
use crate::{
    AbusePolicy, BanRequest, BanScope, BanTarget, HandlerEntry, Session, ThrottleVerdict,
    UpdateStatus,
};

/// What one drain call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Handlers invoked (successfully or not).
    pub handled: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
    /// Packets put back for a later drain.
    pub deferred: usize,
    /// Packets dropped by the connection check, the gate or the throttle.
    pub dropped: usize,
}

/// Throttle outcome after the abuse policy has been applied.
enum RateDecision {
    Pass,
    /// Drop, and stop draining: the primary connection was closed.
    DropAndStop,
}

impl Session {
    /// One world update of this session.
    ///
    /// Runs the idle check, drains the WorldTick queue (and the MapTick
    /// queue when no map worker owns the session), ticks anti-cheat, clock
    /// sync and the logout timer, then decides whether the session is done.
    pub fn update_world(&self, elapsed: Duration, now: Instant) -> UpdateStatus {
        if self.is_destroyed() {
            return UpdateStatus::Destroyed;
        }

        self.check_idle(now);
        self.drain(ProcessingCategory::WorldTick, now);
        if self.map_assignment().is_none() {
            self.drain(ProcessingCategory::MapTick, now);
        }
        self.ctx.services().anti_cheat.update(self, elapsed);
        self.tick_clock_sync(elapsed, now);
        self.tick_logout_request(now);
        self.evaluate_expiry(now)
    }

    /// One map-worker update: drains the MapTick queue.
    pub fn update_map(&self, now: Instant) -> DrainReport {
        self.drain(ProcessingCategory::MapTick, now)
    }

    /// Drains the Immediate queue.
    pub fn drain_immediate(&self, now: Instant) -> DrainReport {
        self.drain(ProcessingCategory::Immediate, now)
    }

    pub(crate) fn drain(&self, category: ProcessingCategory, now: Instant) -> DrainReport {
        let mut report = DrainReport::default();
        let queue = &self.queues[category.index()];
        let Some(_drain_guard) = queue.try_drain() else {
            return report;
        };

        let cap = self.ctx.config().packets_per_drain_cap;
        let mut first_deferred: Option<u64> = None;
        let mut taken = 0;

        while taken < cap {
            if self.is_destroyed() {
                break;
            }
            let Some(packet) = queue.pop_unless(first_deferred) else {
                break;
            };
            taken += 1;

            let Some(entry) = self.ctx.registry().get(packet.opcode()) else {
                warn!(session = %self.id(), opcode = %packet.opcode(), "queued packet has no handler");
                report.dropped += 1;
                continue;
            };

            if packet.tag() != entry.connection {
                warn!(
                    session = %self.id(),
                    opcode = %packet.opcode(),
                    handler = entry.name,
                    expected = %entry.connection,
                    received = %packet.tag(),
                    "packet received on the wrong connection"
                );
                report.dropped += 1;
                continue;
            }

            match gate::evaluate(entry.status, self.gate_view()) {
                GateDecision::Run => {}
                GateDecision::Defer => {
                    first_deferred.get_or_insert(packet.seq());
                    queue.push(packet);
                    report.deferred += 1;
                    continue;
                }
                GateDecision::Reject(reason) => {
                    if reason.is_violation() {
                        warn!(
                            session = %self.id(),
                            opcode = %packet.opcode(),
                            handler = entry.name,
                            required = %entry.status,
                            %reason,
                            "unexpected packet for session state"
                        );
                    } else {
                        debug!(
                            session = %self.id(),
                            opcode = %packet.opcode(),
                            %reason,
                            "dropping packet"
                        );
                    }
                    report.dropped += 1;
                    continue;
                }
            }

            match self.check_rate(&packet, entry, now) {
                RateDecision::Pass => {}
                RateDecision::DropAndStop => {
                    report.dropped += 1;
                    break;
                }
            }

            if entry.clears_recent_logout && entry.status == ProtocolStatus::Authed {
                self.state.lock().recently_logged_out = false;
            }

            report.handled += 1;
            if !self.invoke(entry, &packet) {
                report.failed += 1;
            }
        }

        report
    }

    fn gate_view(&self) -> GateView {
        let state = self.state.lock();
        GateView {
            has_player: state.player.is_some(),
            in_transfer: state.player.is_some_and(|link| link.in_transfer()),
            recently_logged_out: state.recently_logged_out,
            logging_out: state.logging_out,
            in_queue: state.in_queue,
        }
    }

    /// Runs the handler, containing errors and panics. Returns `false` if
    /// it failed.
    fn invoke(&self, entry: &HandlerEntry, packet: &Packet) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| entry.invoke(self, packet))) {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(
                    session = %self.id(),
                    opcode = %packet.opcode(),
                    handler = entry.name,
                    error = %err,
                    "handler failed, packet dropped"
                );
                false
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_owned());
                error!(
                    session = %self.id(),
                    opcode = %packet.opcode(),
                    handler = entry.name,
                    panic = %message,
                    "handler panicked, packet dropped"
                );
                false
            }
        }
    }

    fn check_rate(&self, packet: &Packet, entry: &HandlerEntry, now: Instant) -> RateDecision {
        let opcode = packet.opcode();
        let limit = self.ctx.effective_limit(opcode, entry);
        let verdict = self
            .guard
            .lock()
            .evaluate(opcode, limit, self.ctx.second(now));

        let ThrottleVerdict::Violation { count, limit } = verdict else {
            return RateDecision::Pass;
        };

        let config = self.ctx.config();
        match config.abuse_policy {
            AbusePolicy::Log => {
                warn!(session = %self.id(), %opcode, count, limit, "packet rate limit exceeded");
                RateDecision::Pass
            }
            AbusePolicy::Kick => {
                warn!(session = %self.id(), %opcode, count, limit, "packet rate limit exceeded, kicking");
                self.close_connection(ConnectionTag::Primary);
                RateDecision::DropAndStop
            }
            AbusePolicy::Ban => {
                let target = self.ban_target(config.ban_scope);
                warn!(session = %self.id(), %opcode, count, limit, ?target, "packet rate limit exceeded, banning");
                self.ctx.services().bans.issue_ban(BanRequest {
                    target,
                    duration: Duration::from_secs(config.ban_duration_secs),
                    reason: format!("packet flood: opcode {opcode} sent {count} times in one second (limit {limit})"),
                    author: "anti-abuse",
                });
                self.close_connection(ConnectionTag::Primary);
                RateDecision::DropAndStop
            }
        }
    }

    fn ban_target(&self, scope: BanScope) -> BanTarget {
        match scope {
            BanScope::Account => BanTarget::Account(self.account()),
            BanScope::Character => match self.player() {
                Some(link) => BanTarget::Character(link.guid),
                None => BanTarget::Account(self.account()),
            },
            BanScope::Ip => BanTarget::Ip(self.identity().remote_addr.ip()),
        }
    }
}
