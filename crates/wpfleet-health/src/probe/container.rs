//! Resource-stats probe: container state and usage from the docker CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use wpfleet_core::ProbeKind;
use wpfleet_remote::{Connection, quote};

use crate::error::ProbeError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub container: String,
    pub running: bool,
    /// Docker's state word: `running`, `exited`, `restarting`, ...
    pub state: String,
    /// Healthcheck status, when the image declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    pub restart_count: u32,
    pub cpu_percent: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub memory_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Inspect {
    state: InspectState,
    #[serde(default)]
    restart_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    running: bool,
    #[serde(default)]
    started_at: Option<String>,
    #[serde(default)]
    health: Option<InspectHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHealth {
    status: String,
}

/// One line of `docker stats --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct StatsLine {
    #[serde(rename = "CPUPerc")]
    cpu_perc: String,
    #[serde(rename = "MemUsage")]
    mem_usage: String,
    #[serde(rename = "MemPerc")]
    mem_perc: String,
    #[serde(rename = "NetIO")]
    net_io: String,
}

pub fn inspect_command(container: &str) -> String {
    format!("docker inspect --type container {}", quote(container))
}

pub fn stats_command(container: &str) -> String {
    format!(
        "docker stats --no-stream --format {} {}",
        quote("{{json .}}"),
        quote(container)
    )
}

pub async fn probe_container(
    conn: &dyn Connection,
    container: &str,
) -> Result<ContainerStats, ProbeError> {
    let fail = |cause: String| ProbeError::new(ProbeKind::ResourceStats, cause);

    let inspected = conn
        .execute(&inspect_command(container))
        .await
        .map_err(|e| fail(format!("cannot inspect {container}: {e}")))?;
    let mut stats = parse_inspect(&inspected.stdout, Utc::now()).map_err(fail)?;
    stats.container = container.to_string();

    // A stopped container has no usage worth asking for.
    if stats.running {
        let output = conn
            .execute(&stats_command(container))
            .await
            .map_err(|e| fail(format!("cannot read stats for {container}: {e}")))?;
        apply_stats(&mut stats, &output.stdout).map_err(fail)?;
    }

    debug!(
        host = %conn.host(),
        %container,
        state = %stats.state,
        cpu = stats.cpu_percent,
        mem = stats.memory_percent,
        "resource-stats probe"
    );
    Ok(stats)
}

fn parse_inspect(json: &str, now: DateTime<Utc>) -> Result<ContainerStats, String> {
    let mut entries: Vec<Inspect> =
        serde_json::from_str(json).map_err(|e| format!("unexpected docker inspect output: {e}"))?;
    let entry = entries
        .pop()
        .ok_or_else(|| "docker inspect returned no containers".to_string())?;

    let uptime_secs = if entry.state.running {
        entry
            .state
            .started_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|started| (now - started.with_timezone(&Utc)).num_seconds().max(0) as u64)
    } else {
        None
    };

    Ok(ContainerStats {
        running: entry.state.running,
        state: entry.state.status,
        health: entry.state.health.map(|h| h.status),
        uptime_secs,
        restart_count: entry.restart_count,
        ..ContainerStats::default()
    })
}

fn apply_stats(stats: &mut ContainerStats, output: &str) -> Result<(), String> {
    let line = output
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| "docker stats returned nothing".to_string())?;
    let parsed: StatsLine =
        serde_json::from_str(line).map_err(|e| format!("unexpected docker stats output: {e}"))?;

    stats.cpu_percent = parse_percent(&parsed.cpu_perc)?;
    stats.memory_percent = parse_percent(&parsed.mem_perc)?;
    let (used, limit) = parse_pair(&parsed.mem_usage)?;
    stats.memory_usage_bytes = used;
    stats.memory_limit_bytes = limit;
    let (rx, tx) = parse_pair(&parsed.net_io)?;
    stats.network_rx_bytes = rx;
    stats.network_tx_bytes = tx;
    Ok(())
}

fn parse_percent(s: &str) -> Result<f64, String> {
    let trimmed = s.trim().trim_end_matches('%');
    if trimmed == "--" {
        return Ok(0.0);
    }
    trimmed
        .parse()
        .map_err(|_| format!("invalid percentage {s:?}"))
}

/// `"150MiB / 1.944GiB"` → bytes on both sides.
fn parse_pair(s: &str) -> Result<(u64, u64), String> {
    let (left, right) = s
        .split_once('/')
        .ok_or_else(|| format!("expected 'a / b', got {s:?}"))?;
    Ok((parse_size(left)?, parse_size(right)?))
}

/// Docker's human-readable sizes: decimal `kB`/`MB`/`GB`/`TB`, binary
/// `KiB`/`MiB`/`GiB`/`TiB`.
fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s == "--" {
        return Ok(0);
    }
    let split = s
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid size {s:?}"))?;
    let factor: f64 = match unit.trim() {
        "" | "B" => 1.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        other => return Err(format!("unknown size unit {other:?}")),
    };
    Ok((value * factor).round() as u64)
}
