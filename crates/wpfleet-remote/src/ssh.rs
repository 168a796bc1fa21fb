//! OpenSSH transport.
//!
//! `connect` starts a ControlMaster for the host inside a private temporary
//! directory; every `execute` multiplexes a new session over that master, so
//! authentication happens once per host per invocation. `close` asks the
//! master to exit and the directory is removed when the connection drops.
//!
//! Authentication is entirely the ssh client's business (agent, keys,
//! `~/.ssh/config`). `BatchMode=yes` guarantees that a missing credential
//! fails fast instead of prompting.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use wpfleet_core::{ConfigError, FleetConfig, HostTarget};

use crate::error::TransportError;
use crate::transport::{BoxFuture, CommandOutput, Connection, Transport};

/// Settings shared by every ssh invocation.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub user: Option<String>,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    /// Extra `-o Key=Value` options.
    pub options: Vec<String>,
}

impl SshConfig {
    pub fn from_fleet(config: &FleetConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            user: config.ssh.user.clone(),
            port: config.ssh.port,
            identity_file: config.ssh.identity_file.clone(),
            connect_timeout: config.connect_timeout()?,
            command_timeout: config.command_timeout()?,
            options: config.ssh.options.clone(),
        })
    }

    fn destination(&self, host: &str) -> String {
        match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        }
    }

    /// Arguments common to the master and to every session.
    fn common_args(&self, control_path: &Path) -> Vec<String> {
        let mut args = vec![
            "-S".to_string(),
            control_path.display().to_string(),
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        for opt in &self.options {
            args.push("-o".to_string());
            args.push(opt.clone());
        }
        args
    }
}

/// Opens ControlMaster-backed connections with the system `ssh` binary.
#[derive(Debug, Clone)]
pub struct SshTransport {
    config: Arc<SshConfig>,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    async fn open(&self, target: &HostTarget) -> Result<SshConnection, TransportError> {
        let host = target.host().to_string();
        let connect_err = |reason: String| TransportError::Connect {
            host: host.clone(),
            reason,
        };

        let control_dir = tempfile::Builder::new()
            .prefix("wpfleet-ssh-")
            .tempdir()
            .map_err(|e| connect_err(format!("control directory: {e}")))?;
        let control_path = control_dir.path().join("master.sock");
        let log_path = control_dir.path().join("master.log");
        // The backgrounded master may keep inherited pipes open, so its
        // diagnostics go to a file instead.
        let log = std::fs::File::create(&log_path)
            .map_err(|e| connect_err(format!("master log: {e}")))?;

        let destination = self.config.destination(&host);
        let mut cmd = Command::new("ssh");
        cmd.args(self.config.common_args(&control_path))
            .args(["-M", "-N", "-f"])
            .arg(&destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .kill_on_drop(true);

        debug!(%host, "starting ssh control master");
        let status = tokio::time::timeout(self.config.connect_timeout, cmd.status())
            .await
            .map_err(|_| connect_err(format!("timed out after {:?}", self.config.connect_timeout)))?
            .map_err(|e| connect_err(format!("failed to run ssh: {e}")))?;

        if !status.success() {
            let detail = std::fs::read_to_string(&log_path).unwrap_or_default();
            return Err(connect_err(format!(
                "ssh exited with {}: {}",
                status.code().unwrap_or(-1),
                detail.trim()
            )));
        }

        Ok(SshConnection {
            host,
            destination,
            control_path,
            _control_dir: control_dir,
            config: Arc::clone(&self.config),
        })
    }
}

impl Transport for SshTransport {
    fn connect<'a>(
        &'a self,
        target: &'a HostTarget,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>, TransportError>> {
        Box::pin(async move {
            let conn = self.open(target).await?;
            Ok(Box::new(conn) as Box<dyn Connection>)
        })
    }
}

/// One multiplexed ssh session per command over a shared master.
pub struct SshConnection {
    host: String,
    destination: String,
    control_path: PathBuf,
    /// Removed (with the socket) on drop.
    _control_dir: tempfile::TempDir,
    config: Arc<SshConfig>,
}

impl SshConnection {
    async fn run(&self, command: &str) -> Result<CommandOutput, TransportError> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.config.common_args(&self.control_path))
            .arg(&self.destination)
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.config.command_timeout, cmd.output())
            .await
            .map_err(|_| TransportError::Timeout(self.config.command_timeout))?
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            Err(TransportError::CommandFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

impl Connection for SshConnection {
    fn host(&self) -> &str {
        &self.host
    }

    fn execute<'a>(
        &'a self,
        command: &'a str,
    ) -> BoxFuture<'a, Result<CommandOutput, TransportError>> {
        Box::pin(async move {
            debug!(host = %self.host, %command, "ssh exec");
            self.run(command).await
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut cmd = Command::new("ssh");
            cmd.args(self.config.common_args(&self.control_path))
                .args(["-O", "exit"])
                .arg(&self.destination)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true);
            match tokio::time::timeout(self.config.connect_timeout, cmd.status()).await {
                Ok(Ok(status)) if status.success() => {
                    debug!(host = %self.host, "ssh control master stopped");
                }
                Ok(Ok(status)) => {
                    warn!(host = %self.host, code = ?status.code(), "ssh control master exit failed");
                }
                Ok(Err(e)) => warn!(host = %self.host, error = %e, "failed to stop ssh control master"),
                Err(_) => warn!(host = %self.host, "timed out stopping ssh control master"),
            }
        })
    }
}
