//! Tallies for the end-of-run summary line.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use wpfleet_health::{HealthStatus, HealthVerdict};

use crate::controller::{MutationOutcome, OutcomeKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub failed: usize,
    pub rollback_failed: usize,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[MutationOutcome]) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.kind() {
                OutcomeKind::Committed => summary.committed += 1,
                OutcomeKind::RolledBack => summary.rolled_back += 1,
                OutcomeKind::Failed => summary.failed += 1,
                OutcomeKind::RollbackFailed => summary.rollback_failed += 1,
            }
        }
        summary
    }

    pub fn all_committed(&self) -> bool {
        self.committed == self.total
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hosts: {} committed, {} rolled back, {} failed, {} rollback failed",
            self.total, self.committed, self.rolled_back, self.failed, self.rollback_failed
        )?;
        if self.rollback_failed > 0 {
            f.write_str(" (needs attention)")?;
        }
        Ok(())
    }
}

/// Verdict counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub by_status: BTreeMap<&'static str, usize>,
}

impl HealthSummary {
    pub fn from_verdicts(verdicts: &[HealthVerdict]) -> Self {
        let mut by_status: BTreeMap<&'static str, usize> =
            HealthStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
        for v in verdicts {
            *by_status.entry(v.status.as_str()).or_default() += 1;
        }
        Self {
            total: verdicts.len(),
            by_status,
        }
    }

    pub fn count(&self, status: HealthStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    pub fn all_healthy(&self) -> bool {
        self.count(HealthStatus::Healthy) == self.total
    }
}

impl fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hosts:", self.total)?;
        for (i, status) in HealthStatus::ALL.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{} {}", self.count(*status), status)?;
        }
        Ok(())
    }
}
