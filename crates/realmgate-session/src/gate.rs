//! The protocol-status gate.
//!
//! Decides, from a snapshot of the session's flags, whether a handler
//! with a given [`ProtocolStatus`] requirement may run now.

use std::fmt;

use realmgate_protocol::ProtocolStatus;

/// The session flags the gate looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GateView {
    pub has_player: bool,
    pub in_transfer: bool,
    pub recently_logged_out: bool,
    pub logging_out: bool,
    pub in_queue: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateDecision {
    Run,
    /// Put the packet back at the tail of its queue.
    Defer,
    Reject(Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejection {
    /// Player-scoped packet while the player is between maps. Expected
    /// traffic, logged at debug.
    InTransfer,
    /// Player-scoped packet while the player is leaving or after it has
    /// gone.
    AfterLogout,
    NotLoggedIn,
    NotInTransfer,
    /// Sent while the session waits in the login queue.
    InLoginQueue,
}

impl Rejection {
    /// Whether the rejection points at a misbehaving client rather than
    /// ordinary in-flight traffic.
    pub(crate) fn is_violation(self) -> bool {
        !matches!(self, Self::InTransfer)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::InTransfer => "player is in transfer",
            Self::AfterLogout => "player already logged out",
            Self::NotLoggedIn => "no player logged in",
            Self::NotInTransfer => "player is not in transfer",
            Self::InLoginQueue => "session is in the login queue",
        };
        f.write_str(reason)
    }
}

pub(crate) fn evaluate(required: ProtocolStatus, view: GateView) -> GateDecision {
    match required {
        ProtocolStatus::Authed if view.in_queue => GateDecision::Reject(Rejection::InLoginQueue),
        ProtocolStatus::Authed => GateDecision::Run,

        // The player may already be out of the world while the sequence
        // still holds the link.
        ProtocolStatus::LoggedIn | ProtocolStatus::Transfer if view.logging_out => {
            GateDecision::Reject(Rejection::AfterLogout)
        }

        ProtocolStatus::LoggedIn if view.has_player && view.in_transfer => {
            GateDecision::Reject(Rejection::InTransfer)
        }
        ProtocolStatus::LoggedIn if view.has_player => GateDecision::Run,
        ProtocolStatus::LoggedIn if view.recently_logged_out || view.logging_out => {
            GateDecision::Reject(Rejection::AfterLogout)
        }
        ProtocolStatus::LoggedIn => GateDecision::Defer,

        ProtocolStatus::LoggedInOrRecentlyLoggedOut
            if view.has_player || view.recently_logged_out || view.logging_out =>
        {
            GateDecision::Run
        }
        ProtocolStatus::LoggedInOrRecentlyLoggedOut => GateDecision::Reject(Rejection::NotLoggedIn),

        ProtocolStatus::Transfer if view.has_player && view.in_transfer => GateDecision::Run,
        ProtocolStatus::Transfer => GateDecision::Reject(Rejection::NotInTransfer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IN_WORLD: GateView = GateView {
        has_player: true,
        in_transfer: false,
        recently_logged_out: false,
        logging_out: false,
        in_queue: false,
    };

    const TRANSFERRING: GateView = GateView {
        in_transfer: true,
        ..IN_WORLD
    };

    const NO_PLAYER: GateView = GateView {
        has_player: false,
        ..IN_WORLD
    };

    const JUST_LEFT: GateView = GateView {
        recently_logged_out: true,
        ..NO_PLAYER
    };

    #[test]
    fn test_evaluate_logged_in_table() {
        use GateDecision::*;
        let rows = [
            (IN_WORLD, Run),
            (TRANSFERRING, Reject(Rejection::InTransfer)),
            (NO_PLAYER, Defer),
            (JUST_LEFT, Reject(Rejection::AfterLogout)),
            (GateView { logging_out: true, ..NO_PLAYER }, Reject(Rejection::AfterLogout)),
        ];
        for (view, expected) in rows {
            assert_eq!(evaluate(ProtocolStatus::LoggedIn, view), expected, "{view:?}");
        }
    }

    #[test]
    fn test_evaluate_logged_in_or_recently_logged_out_table() {
        let status = ProtocolStatus::LoggedInOrRecentlyLoggedOut;
        assert_eq!(evaluate(status, IN_WORLD), GateDecision::Run);
        assert_eq!(evaluate(status, JUST_LEFT), GateDecision::Run);
        assert_eq!(
            evaluate(status, GateView { logging_out: true, ..NO_PLAYER }),
            GateDecision::Run
        );
        assert_eq!(
            evaluate(status, NO_PLAYER),
            GateDecision::Reject(Rejection::NotLoggedIn)
        );
    }

    #[test]
    fn test_evaluate_transfer_requires_relocating_player() {
        assert_eq!(evaluate(ProtocolStatus::Transfer, TRANSFERRING), GateDecision::Run);
        assert_eq!(
            evaluate(ProtocolStatus::Transfer, IN_WORLD),
            GateDecision::Reject(Rejection::NotInTransfer)
        );
        assert_eq!(
            evaluate(ProtocolStatus::Transfer, NO_PLAYER),
            GateDecision::Reject(Rejection::NotInTransfer)
        );
    }

    #[test]
    fn test_evaluate_player_scoped_during_logout_rejected() {
        let leaving = GateView { logging_out: true, ..IN_WORLD };
        let leaving_mid_transfer = GateView { logging_out: true, ..TRANSFERRING };
        let rejected = GateDecision::Reject(Rejection::AfterLogout);

        assert_eq!(evaluate(ProtocolStatus::LoggedIn, leaving), rejected);
        assert_eq!(evaluate(ProtocolStatus::Transfer, leaving_mid_transfer), rejected);
        assert_eq!(
            evaluate(ProtocolStatus::LoggedInOrRecentlyLoggedOut, leaving),
            GateDecision::Run
        );
    }

    #[test]
    fn test_evaluate_authed_in_queue_rejected() {
        let queued = GateView { in_queue: true, ..NO_PLAYER };
        assert_eq!(
            evaluate(ProtocolStatus::Authed, queued),
            GateDecision::Reject(Rejection::InLoginQueue)
        );
        assert_eq!(evaluate(ProtocolStatus::Authed, NO_PLAYER), GateDecision::Run);
        assert!(Rejection::InLoginQueue.is_violation());
        assert!(!Rejection::InTransfer.is_violation());
    }
}
