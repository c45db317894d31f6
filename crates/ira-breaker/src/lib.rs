//! IRA Circuit Breaker Registry (ira-breaker)
//!
//! One breaker per named dependency:
//! - `closed`: calls pass through, failures counted in a rolling window
//! - `open`: calls fail fast with [`BreakerError::Open`]
//! - `half_open`: exactly one probe, bounded by the call timeout
//!
//! ```rust,ignore
//! use ira_breaker::prelude::*;
//!
//! let registry = BreakerRegistry::new(BreakerConfig::default());
//! let rows = registry.call("postgres", || db.query(sql)).await?;
//! let dash = registry.dashboard();
//! ```

pub mod breaker;
pub mod config;
pub mod error;
pub mod registry;
pub mod state;

pub use breaker::{BreakerCounters, BreakerSnapshot, CircuitBreaker, FaultMode, FaultSpec};
pub use config::BreakerConfig;
pub use error::{BreakerError, InvalidBreakerConfig};
pub use registry::{BreakerDashboard, BreakerRegistry, SystemStatus, HEALTHY_SCORE};
pub use state::BreakerState;

/// Common imports
pub mod prelude {
    pub use crate::breaker::{CircuitBreaker, FaultSpec};
    pub use crate::config::BreakerConfig;
    pub use crate::error::BreakerError;
    pub use crate::registry::{BreakerDashboard, BreakerRegistry, SystemStatus};
    pub use crate::state::BreakerState;
}
