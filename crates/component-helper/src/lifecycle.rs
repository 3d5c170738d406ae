//! Per-case lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    NotDeployed,
    Deploying,
    Deployed,
    Verifying,
    DriftChecking,
    Destroying,
    Destroyed,
    Skipped,
    Failed,
}

impl CaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseState::NotDeployed => "not_deployed",
            CaseState::Deploying => "deploying",
            CaseState::Deployed => "deployed",
            CaseState::Verifying => "verifying",
            CaseState::DriftChecking => "drift_checking",
            CaseState::Destroying => "destroying",
            CaseState::Destroyed => "destroyed",
            CaseState::Skipped => "skipped",
            CaseState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseState::Destroyed | CaseState::Skipped | CaseState::Failed)
    }

    /// Whether `self -> next` is a legal move.
    ///
    /// A case may deploy more than one component, so `Deployed` and the
    /// verification states can loop back to `Deploying`. Any non-terminal
    /// state can fail; cleanup still runs for a failed case.
    pub fn can_transition_to(&self, next: CaseState) -> bool {
        use CaseState::*;

        if next == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (NotDeployed, Deploying)
                | (NotDeployed, Verifying)
                | (NotDeployed, Skipped)
                | (NotDeployed, Destroyed)
                | (Deploying, Deployed)
                | (Deployed, Verifying)
                | (Deployed, Deploying)
                | (Deployed, DriftChecking)
                | (Deployed, Destroying)
                | (Deployed, Destroyed)
                | (Verifying, Verifying)
                | (Verifying, Deploying)
                | (Verifying, DriftChecking)
                | (Verifying, Destroying)
                | (Verifying, Destroyed)
                | (DriftChecking, Verifying)
                | (DriftChecking, Deploying)
                | (DriftChecking, DriftChecking)
                | (DriftChecking, Destroying)
                | (DriftChecking, Destroyed)
                | (Destroying, Destroying)
                | (Destroying, Destroyed)
        )
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: CaseState) -> HarnessResult<()> {
        if !self.can_transition_to(next) {
            return Err(HarnessError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_happy_path() {
        let mut state = CaseState::NotDeployed;
        for next in [
            CaseState::Deploying,
            CaseState::Deployed,
            CaseState::Verifying,
            CaseState::DriftChecking,
            CaseState::Destroying,
            CaseState::Destroyed,
        ] {
            state.transition(next).unwrap();
        }
        assert!(state.is_terminal());
    }

    #[test_case(CaseState::Deploying ; "deploy failure")]
    #[test_case(CaseState::Destroying ; "destroy failure")]
    #[test_case(CaseState::Verifying ; "assertion panic")]
    fn test_running_states_can_fail(from: CaseState) {
        let mut state = from;
        state.transition(CaseState::Failed).unwrap();
        assert_eq!(state, CaseState::Failed);
    }

    #[test_case(CaseState::NotDeployed, CaseState::Deployed)]
    #[test_case(CaseState::Destroyed, CaseState::Deploying)]
    #[test_case(CaseState::Failed, CaseState::Failed)]
    #[test_case(CaseState::Skipped, CaseState::Verifying)]
    fn test_illegal_transitions(from: CaseState, to: CaseState) {
        let mut state = from;
        let err = state.transition(to).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidStateTransition { .. }));
        assert_eq!(state, from);
    }
}
