//! Breaker state machine

use serde::{Deserialize, Serialize};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls pass through, failures counted
    Closed,
    /// Calls fail fast
    Open,
    /// One trial call allowed
    HalfOpen,
}

impl BreakerState {
    /// Snake-case name, used as a metrics label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States reachable from `from` without operator intervention
#[must_use]
pub fn allowed_transitions(from: BreakerState) -> &'static [BreakerState] {
    use BreakerState::{Closed, HalfOpen, Open};
    match from {
        Closed => &[Open],
        Open => &[HalfOpen],
        HalfOpen => &[Closed, Open],
    }
}

/// Whether the automatic machine may move `from` → `to`
#[must_use]
pub fn can_transition(from: BreakerState, to: BreakerState) -> bool {
    allowed_transitions(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_only_opens() {
        assert!(can_transition(BreakerState::Closed, BreakerState::Open));
        assert!(!can_transition(BreakerState::Closed, BreakerState::HalfOpen));
    }

    #[test]
    fn open_never_closes_directly() {
        assert!(!can_transition(BreakerState::Open, BreakerState::Closed));
        assert!(can_transition(BreakerState::Open, BreakerState::HalfOpen));
    }

    #[test]
    fn labels_are_snake_case() {
        assert_eq!(BreakerState::HalfOpen.to_string(), "half_open");
    }
}
