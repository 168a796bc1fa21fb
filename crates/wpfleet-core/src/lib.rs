//! wpfleet-core — shared building blocks for the wpfleet crates.
//!
//! - **`range`** — `pattern:start-end[:!exclusions]` host range expressions
//! - **`config`** — `wpfleet.toml` parsing and the per-invocation `MutationConfig`
//! - **`types`** — `HostTarget`, `ProbeKind`
//! - **`prompt`** — confirmation and value-entry capabilities

pub mod config;
pub mod error;
pub mod prompt;
pub mod range;
pub mod types;

pub use config::{FleetConfig, MutationConfig};
pub use error::{ConfigError, FormatError};
pub use prompt::{Confirmer, PresetAnswer, PresetValue, PromptError, ValueSource};
pub use range::HostRangeSpec;
pub use types::*;
