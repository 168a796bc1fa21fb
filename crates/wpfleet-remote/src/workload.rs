//! The containerized WordPress process on a host.

use tracing::info;

use wpfleet_core::config::WorkloadSection;

use crate::error::TransportError;
use crate::transport::{Connection, quote};

/// Container name plus the compose file that defines it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    container: String,
    compose_file: String,
}

impl Workload {
    pub fn new(container: impl Into<String>, compose_file: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            compose_file: compose_file.into(),
        }
    }

    pub fn from_section(section: &WorkloadSection) -> Self {
        Self::new(&section.container, &section.compose_file)
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn compose_file(&self) -> &str {
        &self.compose_file
    }

    /// Recreate the containers so they pick up the current compose file.
    pub fn restart_command(&self) -> String {
        format!(
            "docker compose -f {} up -d --force-recreate",
            quote(&self.compose_file)
        )
    }

    /// Restart the workload and wait for the command to return.
    pub async fn restart(&self, conn: &dyn Connection) -> Result<(), TransportError> {
        conn.execute(&self.restart_command()).await?;
        info!(host = %conn.host(), container = %self.container, "workload restarted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryHost, Response};

    #[test]
    fn restart_command_quotes_compose_file() {
        let w = Workload::new("wordpress", "/srv/my site/compose.yml");
        assert_eq!(
            w.restart_command(),
            "docker compose -f '/srv/my site/compose.yml' up -d --force-recreate"
        );
    }

    #[test]
    fn from_section_uses_defaults() {
        let w = Workload::from_section(&WorkloadSection::default());
        assert_eq!(w.container(), "wordpress");
        assert_eq!(w.compose_file(), "/opt/wordpress/docker-compose.yml");
    }

    #[tokio::test]
    async fn restart_runs_compose() {
        let host = MemoryHost::new("wp01");
        host.on("docker compose", Response::ok(""));
        let w = Workload::from_section(&WorkloadSection::default());
        w.restart(&host).await.unwrap();
        assert_eq!(host.commands(), vec![w.restart_command()]);
    }

    #[tokio::test]
    async fn restart_failure_surfaces() {
        let host = MemoryHost::new("wp01");
        host.on("docker compose", Response::fail(1, "no such service"));
        let w = Workload::from_section(&WorkloadSection::default());
        assert!(matches!(
            w.restart(&host).await,
            Err(TransportError::CommandFailed { status: 1, .. })
        ));
    }
}
