//! `wpfleet backup`: create, list and restore compose-file backups.

use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use wpfleet_core::HostTarget;
use wpfleet_remote::{BackupRecord, Connection, RemoteConfigStore, Transport, Workload};
use wpfleet_rollout::{FanOutResult, confirm_mutation};

use super::Fleet;
use crate::output::{OutputFormat, print_json, print_summary, print_table, truncate};
use crate::prompt::TerminalConfirmer;

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Back up the compose file on every host
    Create { range: String },
    /// List backups on every host, oldest first
    List { range: String },
    /// Restore a backup and restart the workload
    Restore {
        range: String,
        /// Backup file to restore; the newest backup when omitted
        #[arg(long)]
        path: Option<String>,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
        /// Do not restart the workload after restoring
        #[arg(long)]
        skip_restart: bool,
    },
}

pub async fn execute(command: BackupCommands, fleet: &Fleet) -> Result<bool> {
    if fleet.format == OutputFormat::Prometheus {
        bail!("prometheus output is only available for `health`");
    }
    match command {
        BackupCommands::Create { range } => {
            let rows = create(fleet, fleet.targets(&range)?).await;
            report(fleet.format, rows)
        }
        BackupCommands::List { range } => {
            let listings = list(fleet, fleet.targets(&range)?).await;
            let ok = listings.iter().all(|l| l.error.is_none());
            match fleet.format {
                OutputFormat::Json => print_json(&listings)?,
                _ => print_table(listing_rows(&listings)),
            }
            Ok(ok)
        }
        BackupCommands::Restore {
            range,
            path,
            yes,
            skip_restart,
        } => {
            let targets = fleet.targets(&range)?;
            let mut config = fleet.config.mutation_config()?;
            config.skip_confirm |= yes;
            config.skip_restart |= skip_restart;

            let which = path.as_deref().unwrap_or("the newest backup");
            let prompt = format!("Restore {which} on {} host(s)?", targets.len());
            if !confirm_mutation(&config, &TerminalConfirmer, &prompt)? {
                print_summary("Aborted, no host was changed");
                return Ok(true);
            }
            let rows = restore(fleet, targets, path, !config.skip_restart).await;
            report(fleet.format, rows)
        }
    }
}

/// Outcome of a backup or restore on one host.
#[derive(Debug, Serialize, Tabled)]
pub struct BackupRow {
    pub host: String,
    pub path: String,
    #[tabled(display_with = "text_cell")]
    pub error: Option<String>,
}

impl FanOutResult for BackupRow {
    fn aborted(target: HostTarget, reason: String) -> Self {
        Self {
            host: target.to_string(),
            path: String::new(),
            error: Some(reason),
        }
    }
}

impl BackupRow {
    fn done(target: &HostTarget, path: String) -> Self {
        Self {
            host: target.to_string(),
            path,
            error: None,
        }
    }
}

/// All backups found on one host.
#[derive(Debug, Serialize)]
pub struct HostBackups {
    pub host: String,
    pub backups: Vec<BackupRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FanOutResult for HostBackups {
    fn aborted(target: HostTarget, reason: String) -> Self {
        Self {
            host: target.to_string(),
            backups: Vec::new(),
            error: Some(reason),
        }
    }
}

#[derive(Tabled)]
struct ListingRow {
    host: String,
    timestamp: String,
    path: String,
}

fn text_cell(text: &Option<String>) -> String {
    text.as_deref().map(|t| truncate(t, 80)).unwrap_or_default()
}

fn listing_rows(listings: &[HostBackups]) -> Vec<ListingRow> {
    listings
        .iter()
        .flat_map(|l| {
            let error = l.error.as_ref().map(|e| ListingRow {
                host: l.host.clone(),
                timestamp: String::new(),
                path: format!("error: {}", truncate(e, 80)),
            });
            l.backups
                .iter()
                .map(|b| ListingRow {
                    host: l.host.clone(),
                    timestamp: b.timestamp.to_rfc3339(),
                    path: b.path.clone(),
                })
                .chain(error)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn report(format: OutputFormat, rows: Vec<BackupRow>) -> Result<bool> {
    let failed = rows.iter().filter(|r| r.error.is_some()).count();
    let total = rows.len();
    match format {
        OutputFormat::Json => print_json(&rows)?,
        _ => print_table(rows),
    }
    print_summary(&format!("{total} hosts: {} succeeded, {failed} failed", total - failed));
    Ok(failed == 0)
}

/// Connect, run `op`, close. A connect failure becomes the error.
async fn with_host<T, F>(transport: &dyn Transport, target: &HostTarget, op: F) -> Result<T, String>
where
    F: for<'c> FnOnce(&'c dyn Connection) -> wpfleet_remote::BoxFuture<'c, Result<T, String>>,
{
    let conn = transport.connect(target).await.map_err(|e| e.to_string())?;
    let result = op(&*conn).await;
    conn.close().await;
    result
}

pub async fn create(fleet: &Fleet, targets: Vec<HostTarget>) -> Vec<BackupRow> {
    let transport = fleet.transport();
    let compose_file = fleet.workload().compose_file().to_string();
    let mut rows = fleet
        .executor()
        .run(targets, move |target| {
            let transport = Arc::clone(&transport);
            let compose_file = compose_file.clone();
            async move {
                let result = with_host(&*transport, &target, |conn| {
                    Box::pin(async move {
                        RemoteConfigStore::new(conn, &compose_file)
                            .backup()
                            .await
                            .map(|record| record.path)
                            .map_err(|e| e.to_string())
                    })
                })
                .await;
                match result {
                    Ok(path) => BackupRow::done(&target, path),
                    Err(e) => BackupRow::aborted(target, e),
                }
            }
        })
        .await;
    rows.sort_by(|a, b| a.host.cmp(&b.host));
    rows
}

pub async fn list(fleet: &Fleet, targets: Vec<HostTarget>) -> Vec<HostBackups> {
    let transport = fleet.transport();
    let compose_file = fleet.workload().compose_file().to_string();
    let mut listings = fleet
        .executor()
        .run(targets, move |target| {
            let transport = Arc::clone(&transport);
            let compose_file = compose_file.clone();
            async move {
                let result = with_host(&*transport, &target, |conn| {
                    Box::pin(async move {
                        RemoteConfigStore::new(conn, &compose_file)
                            .list_backups()
                            .await
                            .map_err(|e| e.to_string())
                    })
                })
                .await;
                match result {
                    Ok(backups) => HostBackups {
                        host: target.to_string(),
                        backups,
                        error: None,
                    },
                    Err(e) => HostBackups::aborted(target, e),
                }
            }
        })
        .await;
    listings.sort_by(|a, b| a.host.cmp(&b.host));
    listings
}

pub async fn restore(
    fleet: &Fleet,
    targets: Vec<HostTarget>,
    path: Option<String>,
    restart: bool,
) -> Vec<BackupRow> {
    let transport = fleet.transport();
    let workload = fleet.workload();
    let mut rows = fleet
        .executor()
        .run(targets, move |target| {
            let transport = Arc::clone(&transport);
            let workload = workload.clone();
            let path = path.clone();
            async move {
                let result = with_host(&*transport, &target, |conn| {
                    Box::pin(restore_one(conn, workload, path, restart))
                })
                .await;
                match result {
                    Ok(path) => BackupRow::done(&target, path),
                    Err(e) => BackupRow::aborted(target, e),
                }
            }
        })
        .await;
    rows.sort_by(|a, b| a.host.cmp(&b.host));
    rows
}

async fn restore_one(
    conn: &dyn Connection,
    workload: Workload,
    path: Option<String>,
    restart: bool,
) -> Result<String, String> {
    let store = RemoteConfigStore::new(conn, workload.compose_file());
    let path = match path {
        Some(path) => path,
        None => store
            .latest_backup()
            .await
            .map_err(|e| e.to_string())?
            .map(|b| b.path)
            .ok_or_else(|| "no backup found".to_string())?,
    };
    store.restore(&path).await.map_err(|e| e.to_string())?;
    if restart {
        workload
            .restart(conn)
            .await
            .map_err(|e| format!("restored, but restart failed: {e}"))?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{COMPOSE, DOCUMENT, fleet, site};

    #[tokio::test]
    async fn create_then_list_then_restore() {
        let wp01 = site("wp01");
        let (fleet, _) = fleet(&[Arc::clone(&wp01)]);
        let targets = vec![HostTarget::new("wp01")];

        let created = create(&fleet, targets.clone()).await;
        assert!(created[0].error.is_none());
        assert!(created[0].path.starts_with(&format!("{COMPOSE}.bak.")));

        wp01.put_file(COMPOSE, "services: {}\n");

        let listings = list(&fleet, targets.clone()).await;
        assert_eq!(listings[0].backups.len(), 1);

        let restored = restore(&fleet, targets, None, true).await;
        assert_eq!(restored[0].path, created[0].path);
        assert_eq!(wp01.file(COMPOSE).as_deref(), Some(DOCUMENT));
        assert!(wp01.commands().iter().any(|c| c.starts_with("docker compose")));
    }

    #[tokio::test]
    async fn restore_without_backups_fails_per_host() {
        let wp01 = site("wp01");
        let (fleet, _) = fleet(&[Arc::clone(&wp01)]);
        let rows = restore(&fleet, vec![HostTarget::new("wp01")], None, false).await;
        assert_eq!(rows[0].error.as_deref(), Some("no backup found"));
        assert!(!wp01.commands().iter().any(|c| c.starts_with("docker compose")));
    }

    #[tokio::test]
    async fn unreachable_host_is_listed_with_error() {
        let (fleet, _) = fleet(&[site("wp01")]);
        let listings = list(&fleet, fleet.targets("wp%02d:1-2").unwrap()).await;
        assert_eq!(listings.len(), 2);
        assert!(listings[1].error.is_some());
        let rows = listing_rows(&listings);
        assert!(rows.iter().any(|r| r.host == "wp02" && r.path.starts_with("error:")));
    }
}
