pub mod backup;
pub mod config;
pub mod health;
pub mod hosts;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::watch;

use wpfleet_core::config::parse_duration;
use wpfleet_core::{FleetConfig, HostRangeSpec, HostTarget, MutationConfig};
use wpfleet_remote::{SshConfig, SshTransport, Transport, Workload};
use wpfleet_rollout::FleetExecutor;

use crate::output::OutputFormat;

/// Everything a command needs: loaded config, transport, fan-out settings.
pub struct Fleet {
    pub config: FleetConfig,
    pub format: OutputFormat,
    concurrency: usize,
    transport: Arc<dyn Transport>,
    shutdown: watch::Receiver<bool>,
}

impl Fleet {
    /// Load the config file (defaults if missing) and set up ssh.
    pub fn load(
        path: &Path,
        concurrency: Option<usize>,
        format: OutputFormat,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let config = FleetConfig::load_or_default(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        let ssh = SshConfig::from_fleet(&config).context("invalid [ssh] section")?;
        let transport: Arc<dyn Transport> = Arc::new(SshTransport::new(ssh));
        Ok(Self::new(config, transport, concurrency, format, shutdown))
    }

    pub fn new(
        config: FleetConfig,
        transport: Arc<dyn Transport>,
        concurrency: Option<usize>,
        format: OutputFormat,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            concurrency: concurrency.unwrap_or(config.fleet.concurrency),
            config,
            format,
            transport,
            shutdown,
        }
    }

    pub fn targets(&self, range: &str) -> Result<Vec<HostTarget>> {
        let spec = HostRangeSpec::parse(range)
            .with_context(|| format!("invalid host range {range:?}"))?;
        Ok(spec.targets())
    }

    pub fn executor(&self) -> FleetExecutor {
        FleetExecutor::new(self.concurrency).with_shutdown(self.shutdown.clone())
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn workload(&self) -> Workload {
        Workload::from_section(&self.config.workload)
    }
}

/// Flags shared by every mutating command. Each one overrides `[mutation]`.
#[derive(Args, Debug, Clone, Default)]
pub struct MutationFlags {
    /// Do not back up the compose file before changing it
    #[arg(long)]
    pub skip_backup: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Do not restart the workload after the change
    #[arg(long)]
    pub skip_restart: bool,

    /// Do not run the post-restart health check
    #[arg(long)]
    pub skip_health_check: bool,

    /// Leave the change applied when the host turns unhealthy
    #[arg(long)]
    pub skip_rollback: bool,

    /// Delay between restart and health check, e.g. "10s" or "500ms"
    #[arg(long, value_name = "DURATION")]
    pub settle: Option<String>,
}

impl MutationFlags {
    pub fn apply(&self, mut base: MutationConfig) -> Result<MutationConfig> {
        base.skip_backup |= self.skip_backup;
        base.skip_confirm |= self.yes;
        base.skip_restart |= self.skip_restart;
        base.skip_health_check |= self.skip_health_check;
        base.skip_rollback |= self.skip_rollback;
        if let Some(settle) = &self.settle {
            base.settle_delay = parse_duration(settle).context("invalid --settle")?;
        }
        Ok(base)
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn flags_override_file_defaults() {
        let base = MutationConfig {
            skip_backup: true,
            ..MutationConfig::default()
        };
        let flags = MutationFlags {
            yes: true,
            skip_rollback: true,
            settle: Some("500ms".to_string()),
            ..MutationFlags::default()
        };
        let config = flags.apply(base).unwrap();
        assert!(config.skip_backup);
        assert!(config.skip_confirm);
        assert!(config.skip_rollback);
        assert!(!config.skip_restart);
        assert_eq!(config.settle_delay, Duration::from_millis(500));
    }

    #[test]
    fn bad_settle_is_rejected() {
        let flags = MutationFlags {
            settle: Some("soon".to_string()),
            ..MutationFlags::default()
        };
        assert!(flags.apply(MutationConfig::default()).is_err());
    }

    #[test]
    fn concurrency_override_wins() {
        let (_tx, rx) = watch::channel(false);
        let transport: Arc<dyn Transport> = Arc::new(wpfleet_remote::memory::MemoryTransport::new());
        let fleet = Fleet::new(FleetConfig::default(), transport, Some(3), OutputFormat::Table, rx);
        assert_eq!(fleet.executor().concurrency(), 3);
    }

    #[test]
    fn range_errors_name_the_expression() {
        let (fleet, _) = test_support::fleet(&[]);
        let err = fleet.targets("wp%02d.example.com:5-1").unwrap_err();
        assert!(err.to_string().contains("wp%02d.example.com:5-1"));
        assert_eq!(fleet.targets("wp%02d:1-3").unwrap().len(), 3);
    }
}
