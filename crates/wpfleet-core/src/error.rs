//! Error types for range expressions and configuration loading.

use thiserror::Error;

/// A host range expression could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("expected <template>:<start>-<end>[:!<exclusions>], got {0:?}")]
    PartCount(String),

    #[error("template {0:?} must contain exactly one %d placeholder")]
    Placeholder(String),

    #[error("range {0:?} must be two integers separated by '-'")]
    Range(String),

    #[error("range start {start} is greater than end {end}")]
    Reversed { start: u32, end: u32 },

    #[error("exclusion segment {0:?} must start with '!'")]
    ExclusionPrefix(String),

    #[error("invalid exclusion {0:?}")]
    ExclusionToken(String),

    #[error("exclusion range {start}-{end} is reversed")]
    ExclusionReversed { start: u32, end: u32 },
}

/// Errors raised while loading `wpfleet.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid duration {0:?}")]
    Duration(String),

    #[error("unknown probe kind {0:?}")]
    UnknownProbe(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
