//! Error types for circuit-protected calls

use std::time::Duration;

/// Outcome of a call that did not return a value
///
/// `Open` means the dependency was never invoked. Every other variant
/// counted toward the breaker's failure threshold.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// Breaker refused the call (fail-fast)
    #[error("circuit open for {dependency}, retry after {retry_after:?}")]
    Open {
        /// Protected dependency
        dependency: String,
        /// Remaining cooldown (zero while a half-open probe is in flight)
        retry_after: Duration,
    },

    /// Wrapped call exceeded the configured call timeout
    #[error("call to {dependency} timed out after {after:?}")]
    Timeout {
        /// Protected dependency
        dependency: String,
        /// Bound that elapsed
        after: Duration,
    },

    /// Failure produced by an injected fault
    #[error("injected fault on {dependency}")]
    Injected {
        /// Protected dependency
        dependency: String,
    },

    /// The wrapped operation returned an error
    #[error("dependency call failed: {0}")]
    Failed(E),
}

impl<E> BreakerError<E> {
    /// Rejected without invoking the dependency
    #[inline]
    #[must_use]
    pub fn is_fail_fast(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Dependency was attempted and did not succeed
    #[inline]
    #[must_use]
    pub fn is_dependency_failure(&self) -> bool {
        !self.is_fail_fast()
    }

    /// Unwrap the operation's own error, if that is what this is
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Map the operation error type
    pub fn map_inner<F, E2>(self, f: F) -> BreakerError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::Open {
                dependency,
                retry_after,
            } => BreakerError::Open {
                dependency,
                retry_after,
            },
            Self::Timeout { dependency, after } => BreakerError::Timeout { dependency, after },
            Self::Injected { dependency } => BreakerError::Injected { dependency },
            Self::Failed(e) => BreakerError::Failed(f(e)),
        }
    }
}

/// Rejected breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid breaker config: {field} {requirement}")]
pub struct InvalidBreakerConfig {
    /// Offending field
    pub field: &'static str,
    /// What the field must satisfy
    pub requirement: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_is_fail_fast() {
        let err: BreakerError<String> = BreakerError::Open {
            dependency: "db".to_string(),
            retry_after: Duration::from_secs(3),
        };
        assert!(err.is_fail_fast());
        assert!(!err.is_dependency_failure());
        assert!(err.to_string().contains("circuit open for db"));
    }

    #[test]
    fn map_inner_preserves_variant() {
        let err: BreakerError<u8> = BreakerError::Failed(7);
        let mapped = err.map_inner(|n| format!("code {n}"));
        assert_eq!(mapped.into_inner().as_deref(), Some("code 7"));

        let timeout: BreakerError<u8> = BreakerError::Timeout {
            dependency: "api".to_string(),
            after: Duration::from_millis(10),
        };
        assert!(timeout.map_inner(|n| n.to_string()).is_dependency_failure());
    }
}
