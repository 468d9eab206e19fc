use crate::model::LocateStatus;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

impl LocateStatus {
    /// States reachable from this one. PENDING is the only non-terminal
    /// state (spec §3 invariant 5); every other state is terminal.
    pub fn valid_transitions(&self) -> &'static [LocateStatus] {
        use LocateStatus::*;
        match self {
            Pending => &[ApprovedFull, ApprovedPartial, Rejected, Expired, Cancelled],
            ApprovedFull | ApprovedPartial | Rejected | Expired | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: &LocateStatus) -> bool {
        self.valid_transitions().contains(next)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocateTransition {
    pub from: LocateStatus,
    pub to: LocateStatus,
    pub reason: Option<String>,
}

/// Guards a LocateRequest's status field against illegal jumps (e.g.
/// re-approving an already-expired locate). Used by the Locate Protocol
/// Engine and the Timeout/Monitor before they persist a new status.
pub fn guard_transition(
    locate_id: u128,
    from: LocateStatus,
    to: LocateStatus,
    reason: Option<&str>,
) -> Result<(), String> {
    if !from.can_transition_to(&to) {
        let msg = format!(
            "illegal locate transition for {locate_id}: {from:?} -> {to:?} (reason: {reason:?})"
        );
        error!("{}", msg);
        return Err(msg);
    }
    info!(locate_id, from = ?from, to = ?to, "locate transition");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_reach_any_terminal_state() {
        for target in [
            LocateStatus::ApprovedFull,
            LocateStatus::ApprovedPartial,
            LocateStatus::Rejected,
            LocateStatus::Expired,
            LocateStatus::Cancelled,
        ] {
            assert!(guard_transition(1, LocateStatus::Pending, target, None).is_ok());
        }
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        assert!(guard_transition(1, LocateStatus::Expired, LocateStatus::ApprovedFull, None).is_err());
        assert!(guard_transition(1, LocateStatus::Rejected, LocateStatus::Pending, None).is_err());
    }
}
