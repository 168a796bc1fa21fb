//! Shared types used across wpfleet crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A resolved remote endpoint: a hostname, optionally paired with the
/// container that runs the site on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostTarget {
    host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workload: Option<String>,
}

impl HostTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            workload: None,
        }
    }

    /// Pair this host with a workload (container) name.
    pub fn with_workload(mut self, workload: impl Into<String>) -> Self {
        self.workload = Some(workload.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn workload(&self) -> Option<&str> {
        self.workload.as_deref()
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.workload {
            Some(w) => write!(f, "{}/{}", self.host, w),
            None => f.write_str(&self.host),
        }
    }
}

/// The independent health probes a verdict can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeKind {
    /// HTTP request with phase timings.
    Network,
    /// TLS handshake and certificate inspection.
    Tls,
    /// Container state and resource usage.
    ResourceStats,
    /// WordPress introspection through wp-cli.
    Application,
    /// Application-exposed Prometheus metrics endpoint.
    Metrics,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 5] = [
        ProbeKind::Network,
        ProbeKind::Tls,
        ProbeKind::ResourceStats,
        ProbeKind::Application,
        ProbeKind::Metrics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Network => "network",
            ProbeKind::Tls => "tls",
            ProbeKind::ResourceStats => "resource-stats",
            ProbeKind::Application => "application",
            ProbeKind::Metrics => "metrics",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "network" | "http" => Ok(ProbeKind::Network),
            "tls" | "ssl" => Ok(ProbeKind::Tls),
            "resource-stats" | "resources" | "stats" => Ok(ProbeKind::ResourceStats),
            "application" | "app" | "wordpress" => Ok(ProbeKind::Application),
            "metrics" => Ok(ProbeKind::Metrics),
            other => Err(ConfigError::UnknownProbe(other.to_string())),
        }
    }
}
