//! Group session phase machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPhase {
    /// Participants are validated against the registry.
    #[default]
    Forming,
    /// Broadcast/response rounds are running.
    Active,
    /// A consensus request is being aggregated.
    ConsensusPending,
    /// Terminal: no further broadcasts; outcome and transcript stay readable.
    Closed,
}

impl GroupPhase {
    pub fn allowed_transitions(&self) -> &'static [GroupPhase] {
        use GroupPhase::*;
        match self {
            Forming => &[Active, Closed],
            Active => &[ConsensusPending, Closed],
            ConsensusPending => &[Closed],
            Closed => &[],
        }
    }

    pub fn can_transition_to(&self, target: GroupPhase) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Phases in which new participants may still take a seat.
    pub fn accepts_joins(&self) -> bool {
        matches!(self, Self::Forming | Self::Active)
    }
}

impl fmt::Display for GroupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Forming => "forming",
            Self::Active => "active",
            Self::ConsensusPending => "consensus_pending",
            Self::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: GroupPhase,
    pub to: GroupPhase,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl PhaseTransition {
    pub fn new(from: GroupPhase, to: GroupPhase, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(GroupPhase::Forming.can_transition_to(GroupPhase::Active));
        assert!(GroupPhase::Active.can_transition_to(GroupPhase::ConsensusPending));
        assert!(GroupPhase::ConsensusPending.can_transition_to(GroupPhase::Closed));
    }

    #[test]
    fn test_cancellation_shortcuts() {
        // Every non-terminal phase can go straight to closed.
        assert!(GroupPhase::Forming.can_transition_to(GroupPhase::Closed));
        assert!(GroupPhase::Active.can_transition_to(GroupPhase::Closed));
        assert!(GroupPhase::ConsensusPending.can_transition_to(GroupPhase::Closed));
    }

    #[test]
    fn test_no_skips_or_reversals() {
        assert!(!GroupPhase::Forming.can_transition_to(GroupPhase::ConsensusPending));
        assert!(!GroupPhase::Active.can_transition_to(GroupPhase::Forming));
        assert!(!GroupPhase::Closed.can_transition_to(GroupPhase::Active));
        assert!(GroupPhase::Closed.allowed_transitions().is_empty());
    }

    #[test]
    fn test_join_windows() {
        assert!(GroupPhase::Forming.accepts_joins());
        assert!(GroupPhase::Active.accepts_joins());
        assert!(!GroupPhase::ConsensusPending.accepts_joins());
        assert!(!GroupPhase::Closed.accepts_joins());
    }
}
