//! wpfleet-rollout — guarded configuration changes across a fleet.
//!
//! Each host goes through backup, apply, restart and a health gate; an
//! unhealthy host is rolled back from its backup. Hosts are processed
//! concurrently with a fixed upper bound.
//!
//! # Components
//!
//! - **`controller`** — per-host mutation state machine and rollback
//! - **`executor`** — bounded fan-out with interrupt support
//! - **`summary`** — end-of-run tallies

pub mod controller;
pub mod error;
pub mod executor;
pub mod summary;

pub use controller::{
    FleetMutation, Mutation, MutationController, MutationOutcome, MutationPhase, OutcomeKind,
    confirm_mutation,
};
pub use error::MutationError;
pub use executor::{FanOutResult, FleetExecutor};
pub use summary::{BatchSummary, HealthSummary};
