//! Probe failures.

use serde::Serialize;
use thiserror::Error;

use wpfleet_core::ProbeKind;

/// A probe that could not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind} probe failed: {cause}")]
pub struct ProbeError {
    pub kind: ProbeKind,
    pub cause: String,
}

impl ProbeError {
    pub fn new(kind: ProbeKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }
}
