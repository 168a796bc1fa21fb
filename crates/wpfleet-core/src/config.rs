//! wpfleet.toml configuration parser.
//!
//! Every section and field is optional; a missing file yields the defaults.
//!
//! ```toml
//! [fleet]
//! concurrency = 10
//!
//! [ssh]
//! user = "deploy"
//! identity_file = "~/.ssh/fleet_ed25519"
//!
//! [workload]
//! container = "wordpress"
//! compose_file = "/opt/wordpress/docker-compose.yml"
//!
//! [health]
//! settle_delay = "10s"
//! probes = ["network", "tls", "resource-stats", "application"]
//! url = "https://{host}/"
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::types::ProbeKind;

pub const DEFAULT_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub fleet: FleetSection,
    pub ssh: SshSection,
    pub workload: WorkloadSection,
    pub health: HealthSection,
    pub mutation: MutationDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSection {
    pub concurrency: usize,
}

impl Default for FleetSection {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub user: Option<String>,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout: String,
    pub command_timeout: String,
    /// Extra `-o Key=Value` options passed to every ssh invocation.
    pub options: Vec<String>,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            user: None,
            port: 22,
            identity_file: None,
            connect_timeout: "10s".to_string(),
            command_timeout: "2m".to_string(),
            options: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadSection {
    pub container: String,
    pub compose_file: String,
}

impl Default for WorkloadSection {
    fn default() -> Self {
        Self {
            container: "wordpress".to_string(),
            compose_file: "/opt/wordpress/docker-compose.yml".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub settle_delay: String,
    pub timeout: String,
    pub probes: Vec<String>,
    /// Site URL; `{host}` is replaced with the target hostname.
    pub url: String,
    pub verify_tls: bool,
    pub follow_redirects: bool,
    pub headers: BTreeMap<String, String>,
    pub metrics_path: Option<String>,
    pub metrics_token: Option<String>,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            settle_delay: "10s".to_string(),
            timeout: "10s".to_string(),
            probes: ["network", "tls", "resource-stats", "application"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            url: "https://{host}/".to_string(),
            verify_tls: true,
            follow_redirects: true,
            headers: BTreeMap::new(),
            metrics_path: None,
            metrics_token: None,
        }
    }
}

impl HealthSection {
    pub fn probe_set(&self) -> Result<BTreeSet<ProbeKind>, ConfigError> {
        self.probes.iter().map(|p| p.parse()).collect()
    }
}

/// Default values for the per-invocation skip flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationDefaults {
    pub skip_backup: bool,
    pub skip_confirm: bool,
    pub skip_restart: bool,
    pub skip_health_check: bool,
    pub skip_rollback: bool,
}

/// Settings for one mutating invocation, frozen before any host is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationConfig {
    pub skip_backup: bool,
    pub skip_confirm: bool,
    pub skip_restart: bool,
    pub skip_health_check: bool,
    pub skip_rollback: bool,
    /// Fixed wait between restart and the single health check.
    pub settle_delay: Duration,
    pub health_timeout: Duration,
    pub probes: BTreeSet<ProbeKind>,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            skip_backup: false,
            skip_confirm: false,
            skip_restart: false,
            skip_health_check: false,
            skip_rollback: false,
            settle_delay: Duration::from_secs(10),
            health_timeout: Duration::from_secs(10),
            probes: [
                ProbeKind::Network,
                ProbeKind::Tls,
                ProbeKind::ResourceStats,
                ProbeKind::Application,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content, path)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.is_file() {
            Self::from_file(path)
        } else {
            debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: FleetConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.fleet.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "fleet.concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.workload.compose_file.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "workload.compose_file",
                reason: "must not be empty".to_string(),
            });
        }
        self.health.probe_set()?;
        Ok(())
    }

    pub fn connect_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.ssh.connect_timeout)
    }

    pub fn command_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.ssh.command_timeout)
    }

    pub fn health_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.health.timeout)
    }

    /// Freeze the file defaults into a `MutationConfig`.
    pub fn mutation_config(&self) -> Result<MutationConfig, ConfigError> {
        Ok(MutationConfig {
            skip_backup: self.mutation.skip_backup,
            skip_confirm: self.mutation.skip_confirm,
            skip_restart: self.mutation.skip_restart,
            skip_health_check: self.mutation.skip_health_check,
            skip_rollback: self.mutation.skip_rollback,
            settle_delay: parse_duration(&self.health.settle_delay)?,
            health_timeout: self.health_timeout()?,
            probes: self.health.probe_set()?,
        })
    }
}

/// Parse a duration string like "5s", "500ms", "2m", or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let err = || ConfigError::Duration(s.to_string());
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| err())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| err())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
            .ok_or_else(err)
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| err())
    }
}
