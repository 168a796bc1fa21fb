//! wpfleet-health — composite health verdicts for WordPress hosts.
//!
//! Runs up to five independent probes against a target and reduces their
//! results to one deterministic status. The same verdict is used for
//! reporting and as the rollback trigger of a mutation.
//!
//! # Architecture
//!
//! ```text
//! HealthEngine::check(target, conn, probes)
//!   ├── network         probe::http       (this machine → site)
//!   ├── tls             probe::tls        (this machine → site)
//!   ├── resource-stats  probe::container  (docker CLI over conn)
//!   ├── application     probe::wordpress  (wp-cli over conn)
//!   ├── metrics         probe::metrics    (site metrics endpoint)
//!   └── verdict::reduce → HealthVerdict { status, warnings, per_probe }
//! ```
//!
//! Every enabled probe always runs; a failing probe is kept in `per_probe`
//! as an error result and never short-circuits the others.

pub mod engine;
pub mod error;
pub mod probe;
pub mod prometheus;
pub mod verdict;

pub use engine::{HealthEngine, VerdictSource};
pub use error::ProbeError;
pub use probe::{HealthOptions, ProbePayload};
pub use verdict::{HealthStatus, HealthVerdict, ProbeResult, reduce};
