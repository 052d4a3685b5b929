//! Per-session, per-opcode packet-rate counters.
//!
//! Each opcode gets a one-second window. The first packet in a new second
//! resets the count; every packet past the limit is a violation. The guard
//! only counts. What happens on a violation (log, kick, ban) is decided by
//! the session according to [`AbusePolicy`](crate::AbusePolicy).

use std::collections::HashMap;

use realmgate_protocol::Opcode;

/// Outcome of counting one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleVerdict {
    Approved,
    /// Over the limit. `count` includes this packet.
    Violation { count: u32, limit: u32 },
}

#[derive(Debug, Clone, Copy, Default)]
struct Window {
    second: u64,
    count: u32,
}

#[derive(Debug, Default)]
pub struct AntiAbuseGuard {
    windows: HashMap<Opcode, Window>,
}

impl AntiAbuseGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one packet of `opcode` received during `second`.
    ///
    /// `limit` of `None` approves without counting. A limit of 0 makes
    /// every packet a violation.
    pub fn evaluate(&mut self, opcode: Opcode, limit: Option<u32>, second: u64) -> ThrottleVerdict {
        let Some(limit) = limit else {
            return ThrottleVerdict::Approved;
        };

        let window = self.windows.entry(opcode).or_insert(Window { second, count: 0 });
        if window.second != second {
            *window = Window { second, count: 0 };
        }
        window.count = window.count.saturating_add(1);

        if window.count <= limit {
            ThrottleVerdict::Approved
        } else {
            ThrottleVerdict::Violation {
                count: window.count,
                limit,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OP: Opcode = Opcode(0x10);

    #[test]
    fn test_evaluate_no_limit_always_approves() {
        let mut guard = AntiAbuseGuard::new();
        for _ in 0..1_000 {
            assert_eq!(guard.evaluate(OP, None, 0), ThrottleVerdict::Approved);
        }
    }

    #[test]
    fn test_evaluate_sixth_packet_in_window_violates() {
        let mut guard = AntiAbuseGuard::new();
        for _ in 0..5 {
            assert_eq!(guard.evaluate(OP, Some(5), 12), ThrottleVerdict::Approved);
        }
        assert_eq!(
            guard.evaluate(OP, Some(5), 12),
            ThrottleVerdict::Violation { count: 6, limit: 5 }
        );
    }

    #[test]
    fn test_evaluate_new_second_resets_window() {
        let mut guard = AntiAbuseGuard::new();
        for _ in 0..6 {
            guard.evaluate(OP, Some(5), 12);
        }
        assert_eq!(guard.evaluate(OP, Some(5), 13), ThrottleVerdict::Approved);
    }

    #[test]
    fn test_evaluate_zero_limit_rejects_first_packet() {
        let mut guard = AntiAbuseGuard::new();
        assert_eq!(
            guard.evaluate(OP, Some(0), 0),
            ThrottleVerdict::Violation { count: 1, limit: 0 }
        );
    }

    #[test]
    fn test_evaluate_opcodes_counted_independently() {
        let mut guard = AntiAbuseGuard::new();
        assert_eq!(guard.evaluate(OP, Some(1), 0), ThrottleVerdict::Approved);
        assert_eq!(guard.evaluate(Opcode(0x11), Some(1), 0), ThrottleVerdict::Approved);
        assert!(matches!(
            guard.evaluate(OP, Some(1), 0),
            ThrottleVerdict::Violation { .. }
        ));
    }
}
