//! Fixed-rate update clock shared by the world loop and the map workers.
//!
//! A [`TickScheduler`] wakes its loop every `1 / tick_rate_hz` seconds and
//! hands back a [`TickInfo`]. The field that matters to session code is
//! [`TickInfo::elapsed`]: the real time since the previous update. Logout
//! delays, idle deadlines, clock sync and anti-cheat all advance by it, so
//! an update that wakes late still accounts for the whole gap.
//!
//! An update that overruns its slot does not cause a burst of catch-up
//! ticks. The next slot is scheduled one period after the late wake-up
//! and the dropped slots are reported in [`TickInfo::missed`].
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.cancelled() => break,
//!         tick = scheduler.wait_for_tick() => {
//!             update_sessions(tick.elapsed);
//!             scheduler.end_update();
//!         }
//!     }
//! }
//! ```

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Updates per second, `1..=MAX_TICK_RATE_HZ`.
    pub tick_rate_hz: u32,
    /// Share of the period (0.0 to 1.0) an update may use before it is
    /// logged as slow.
    pub slow_update_ratio: f64,
    /// Random extra delay (upper bound) before the first tick. Spreads out
    /// map workers that start at the same moment.
    pub start_jitter_ms: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 20,
            slow_update_ratio: 0.8,
            start_jitter_ms: 0,
        }
    }
}

impl TickConfig {
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values. [`TickScheduler::new`] calls this.
    pub fn validated(mut self) -> Self {
        let rate = self.tick_rate_hz.clamp(1, Self::MAX_TICK_RATE_HZ);
        if rate != self.tick_rate_hz {
            warn!(
                rate = self.tick_rate_hz,
                clamped = rate,
                "tick_rate_hz out of range, clamping"
            );
            self.tick_rate_hz = rate;
        }
        if !(0.0..=1.0).contains(&self.slow_update_ratio) {
            warn!(ratio = self.slow_update_ratio, "slow_update_ratio out of range, clamping");
            self.slow_update_ratio = self.slow_update_ratio.clamp(0.0, 1.0);
        }
        self
    }

    /// Time between two ticks.
    pub fn period(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.max(1)
    }
}

// ---------------------------------------------------------------------------
// Tick info and stats
// ---------------------------------------------------------------------------

/// One fired tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInfo {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// The configured period.
    pub dt: Duration,
    /// Real time since the previous tick, or since the scheduler was
    /// created for the first one.
    pub elapsed: Duration,
    /// Woke up more than a tenth of a period after the slot.
    pub late: bool,
    /// Whole slots that passed without a tick.
    pub missed: u64,
}

/// Running totals for one scheduler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickStats {
    pub ticks: u64,
    pub late_ticks: u64,
    pub missed_slots: u64,
    /// Longest update measured by [`TickScheduler::end_update`].
    pub slowest_update: Duration,
    /// Last update's time as a share of the period.
    pub last_load: f64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct TickScheduler {
    config: TickConfig,
    period: Duration,
    next_due: TokioInstant,
    previous: TokioInstant,
    /// Set by `wait_for_tick`, taken by `end_update`.
    update_started: Option<Instant>,
    stats: TickStats,
}

impl TickScheduler {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let period = config.period();
        let jitter = match config.start_jitter_ms {
            0 => Duration::ZERO,
            max => Duration::from_millis(rand::rng().random_range(0..max)),
        };
        let now = TokioInstant::now();

        debug!(
            rate_hz = config.tick_rate_hz,
            period_ms = period.as_millis() as u64,
            jitter_ms = jitter.as_millis() as u64,
            "tick scheduler created"
        );

        Self {
            config,
            period,
            next_due: now + period + jitter,
            previous: now,
            update_started: None,
            stats: TickStats::default(),
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Sleeps until the next slot. Cancel-safe: a dropped wait leaves the
    /// schedule as it was.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let due = self.next_due;
        time::sleep_until(due).await;

        let now = TokioInstant::now();
        let behind = now.saturating_duration_since(due);
        let late = behind > self.period / 10;
        let missed = (behind.as_nanos() / self.period.as_nanos().max(1)) as u64;
        if missed > 0 {
            warn!(
                tick = self.stats.ticks + 1,
                missed,
                behind_ms = behind.as_millis() as u64,
                "update loop fell behind, dropping missed slots"
            );
        }

        self.next_due = now + self.period;
        let elapsed = now.saturating_duration_since(self.previous);
        self.previous = now;
        self.update_started = Some(Instant::now());

        self.stats.ticks += 1;
        self.stats.missed_slots += missed;
        if late {
            self.stats.late_ticks += 1;
        }
        trace!(tick = self.stats.ticks, late, "tick");

        TickInfo {
            tick: self.stats.ticks,
            dt: self.period,
            elapsed,
            late,
            missed,
        }
    }

    /// Closes the update opened by the last tick and returns how long it
    /// took. Without an open update this returns zero and records nothing.
    pub fn end_update(&mut self) -> Duration {
        let Some(started) = self.update_started.take() else {
            return Duration::ZERO;
        };
        let spent = started.elapsed();
        let load = spent.as_secs_f64() / self.period.as_secs_f64();

        self.stats.last_load = load;
        self.stats.slowest_update = self.stats.slowest_update.max(spent);
        if load >= self.config.slow_update_ratio {
            warn!(
                tick = self.stats.ticks,
                spent_ms = spent.as_secs_f64() * 1000.0,
                period_ms = self.period.as_millis() as u64,
                "slow update"
            );
        }
        spent
    }

    pub fn ticks(&self) -> u64 {
        self.stats.ticks
    }

    pub fn stats(&self) -> &TickStats {
        &self.stats
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}
