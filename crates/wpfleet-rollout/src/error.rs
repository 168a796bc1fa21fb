//! Per-host mutation failures.

use thiserror::Error;

use wpfleet_health::HealthStatus;
use wpfleet_remote::{StoreError, TransportError};

/// Why one host's mutation did not commit.
#[derive(Debug, Clone, Error)]
pub enum MutationError {
    #[error("connection failed: {0}")]
    Connect(TransportError),

    #[error("backup failed: {0}")]
    Backup(StoreError),

    #[error("apply failed: {0}")]
    Apply(StoreError),

    #[error("restart failed: {0}")]
    Restart(TransportError),

    #[error("health check returned {status}: {}", warnings.join("; "))]
    Unhealthy {
        status: HealthStatus,
        warnings: Vec<String>,
    },

    /// The host is in an unknown state and needs an operator.
    #[error("rollback failed ({cause}) after: {trigger}")]
    RollbackFailed {
        trigger: Box<MutationError>,
        cause: String,
    },

    /// The worker never ran or did not finish.
    #[error("aborted: {0}")]
    Aborted(String),
}

impl MutationError {
    pub fn is_rollback_failure(&self) -> bool {
        matches!(self, MutationError::RollbackFailed { .. })
    }
}
