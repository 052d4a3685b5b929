//! Heartbeat and client clock estimation.
//!
//! The world update advances a [`ClockSync`] with the real elapsed time.
//! When its timer fires, the session sends `TimeSync { counter,
//! server_time }` on the primary connection. The client echoes the counter
//! with its own clock, which gives one [`ClockSample`]:
//!
//! ```text
//! rtt   = server_now - server_sent
//! delta = server_sent + rtt / 2 - client_time
//! ```
//!
//! A single sample is noisy (a retransmitted TCP segment inflates the
//! RTT), so the reported delta only looks at the lower-latency half of the
//! last few samples and takes their median.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tracing::trace;

use crate::SessionError;

/// Samples kept for the delta estimate.
pub const CLOCK_SAMPLE_WINDOW: usize = 6;

/// Unanswered requests kept before the oldest is forgotten.
const MAX_PENDING: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    /// Server clock minus client clock, in milliseconds.
    pub delta_ms: i64,
    pub rtt_ms: u64,
}

#[derive(Debug)]
pub struct ClockSync {
    interval: Duration,
    remaining: Duration,
    next_counter: u32,
    /// counter → server time (ms) the request was sent.
    pending: HashMap<u32, u64>,
    samples: VecDeque<ClockSample>,
}

impl ClockSync {
    /// The first request fires after `first`, later ones every `interval`.
    pub fn new(first: Duration, interval: Duration) -> Self {
        Self {
            interval,
            remaining: first,
            next_counter: 0,
            pending: HashMap::new(),
            samples: VecDeque::with_capacity(CLOCK_SAMPLE_WINDOW),
        }
    }

    /// Advances the timer. Returns the counter of a request to send now.
    pub fn advance(&mut self, elapsed: Duration, server_ms: u64) -> Option<u32> {
        if elapsed < self.remaining {
            self.remaining -= elapsed;
            return None;
        }
        self.remaining = self.interval;

        let counter = self.next_counter;
        self.next_counter = self.next_counter.wrapping_add(1);

        if self.pending.len() >= MAX_PENDING {
            if let Some(oldest) = self.pending.keys().min().copied() {
                self.pending.remove(&oldest);
            }
        }
        self.pending.insert(counter, server_ms);
        Some(counter)
    }

    /// Consumes the response to request `counter`.
    pub fn on_response(
        &mut self,
        counter: u32,
        client_ms: u64,
        server_ms: u64,
    ) -> Result<ClockSample, SessionError> {
        let sent = self
            .pending
            .remove(&counter)
            .ok_or(SessionError::UnknownTimeSyncCounter(counter))?;

        let rtt_ms = server_ms.saturating_sub(sent);
        // client_ms is whatever the client sent; keep the arithmetic wide.
        let delta = i128::from(sent + rtt_ms / 2) - i128::from(client_ms);
        let delta_ms = delta.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;
        let sample = ClockSample { delta_ms, rtt_ms };

        if self.samples.len() == CLOCK_SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        trace!(counter, rtt_ms, delta_ms, "time sync sample");
        Ok(sample)
    }

    /// Median delta of the lower-RTT half of the recent samples.
    pub fn delta_ms(&self) -> Option<i64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut by_rtt: Vec<ClockSample> = self.samples.iter().copied().collect();
        by_rtt.sort_by_key(|s| s.rtt_ms);
        by_rtt.truncate(by_rtt.len().div_ceil(2));

        let mut deltas: Vec<i64> = by_rtt.iter().map(|s| s.delta_ms).collect();
        deltas.sort_unstable();
        deltas.get(deltas.len() / 2).copied()
    }

    pub fn last_sample(&self) -> Option<ClockSample> {
        self.samples.back().copied()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn five_then_ten() -> ClockSync {
        ClockSync::new(Duration::from_secs(5), Duration::from_secs(10))
    }

    #[test]
    fn test_advance_first_fire_after_five_seconds() {
        let mut clock = five_then_ten();
        assert_eq!(clock.advance(Duration::from_millis(4_999), 0), None);
        assert_eq!(clock.advance(Duration::from_millis(1), 5_000), Some(0));
    }

    #[test]
    fn test_advance_then_every_ten_seconds() {
        let mut clock = five_then_ten();
        clock.advance(Duration::from_secs(5), 5_000);

        assert_eq!(clock.advance(Duration::from_secs(9), 14_000), None);
        assert_eq!(clock.advance(Duration::from_secs(1), 15_000), Some(1));
        assert_eq!(clock.pending(), 2);
    }

    #[test]
    fn test_on_response_computes_rtt_and_delta() {
        let mut clock = five_then_ten();
        let counter = clock.advance(Duration::from_secs(5), 10_000).unwrap();

        // Sent at 10_000, answered at 10_100, client clock reads 4_000.
        let sample = clock.on_response(counter, 4_000, 10_100).unwrap();
        assert_eq!(sample.rtt_ms, 100);
        assert_eq!(sample.delta_ms, 10_050 - 4_000);
        assert_eq!(clock.delta_ms(), Some(6_050));
    }

    #[test]
    fn test_on_response_huge_client_time_saturates() {
        let mut clock = five_then_ten();
        let counter = clock.advance(Duration::from_secs(5), 10_000).unwrap();

        let sample = clock.on_response(counter, 1 << 63, 10_100).unwrap();
        assert_eq!(sample.delta_ms, i64::MIN + 10_050);
        assert_eq!(sample.rtt_ms, 100);

        let counter = clock.advance(Duration::from_secs(10), 20_000).unwrap();
        let sample = clock.on_response(counter, u64::MAX, 20_000).unwrap();
        assert_eq!(sample.delta_ms, i64::MIN);
    }

    #[test]
    fn test_on_response_unknown_counter_is_error() {
        let mut clock = five_then_ten();
        let err = clock.on_response(42, 0, 0).unwrap_err();
        assert!(matches!(err, SessionError::UnknownTimeSyncCounter(42)));
    }

    #[test]
    fn test_on_response_same_counter_twice_is_error() {
        let mut clock = five_then_ten();
        let counter = clock.advance(Duration::from_secs(5), 0).unwrap();
        clock.on_response(counter, 0, 10).unwrap();
        assert!(clock.on_response(counter, 0, 20).is_err());
    }

    #[test]
    fn test_delta_ignores_high_latency_samples() {
        let mut clock = ClockSync::new(Duration::ZERO, Duration::ZERO);
        // (rtt, delta): three fast samples agree on ~1_000, three slow
        // outliers disagree wildly.
        let rows = [(10, 1_000), (500, 9_000), (12, 1_002), (800, -7_000), (8, 998), (900, 5_000)];
        const SENT: u64 = 100_000;
        for (rtt, delta) in rows {
            let counter = clock.advance(Duration::ZERO, SENT).unwrap();
            let client = (SENT + rtt / 2) as i64 - delta;
            clock.on_response(counter, client as u64, SENT + rtt).unwrap();
        }
        assert_eq!(clock.delta_ms(), Some(1_000));
    }

    #[test]
    fn test_samples_window_keeps_last_six() {
        let mut clock = ClockSync::new(Duration::ZERO, Duration::ZERO);
        for i in 0..10u64 {
            let counter = clock.advance(Duration::ZERO, 1_000).unwrap();
            clock.on_response(counter, i, 1_000).unwrap();
        }
        assert_eq!(clock.samples.len(), CLOCK_SAMPLE_WINDOW);
        assert_eq!(clock.last_sample().map(|s| s.delta_ms), Some(1_000 - 9));
    }
}
