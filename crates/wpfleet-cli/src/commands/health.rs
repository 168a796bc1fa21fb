//! `wpfleet health`: probe every host and report verdicts.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tabled::Tabled;
use tracing::warn;

use wpfleet_core::{HostTarget, ProbeKind};
use wpfleet_health::prometheus::render_verdicts;
use wpfleet_health::{HealthEngine, HealthOptions, HealthStatus, HealthVerdict, ProbePayload};
use wpfleet_remote::Transport;
use wpfleet_rollout::HealthSummary;

use super::Fleet;
use crate::output::{OutputFormat, print_json, print_summary, print_table, truncate};

#[derive(Args)]
pub struct HealthArgs {
    /// Host range, e.g. "wp%02d.example.com:1-20"
    pub range: String,

    /// Probe to run; repeat for several. Defaults to `[health] probes`.
    #[arg(long = "probe", value_name = "KIND")]
    pub probes: Vec<ProbeKind>,
}

pub async fn execute(args: HealthArgs, fleet: &Fleet) -> Result<bool> {
    let targets = fleet.targets(&args.range)?;
    let probes = if args.probes.is_empty() {
        fleet.config.health.probe_set()?
    } else {
        args.probes.into_iter().collect()
    };
    let engine = HealthEngine::new(HealthOptions::from_config(&fleet.config)?);

    let verdicts = check_fleet(fleet, engine, targets, probes).await;
    let summary = HealthSummary::from_verdicts(&verdicts);
    let ok = verdicts
        .iter()
        .all(|v| matches!(v.status, HealthStatus::Healthy | HealthStatus::Degraded));

    match fleet.format {
        OutputFormat::Table => print_table(verdicts.iter().map(verdict_row).collect()),
        OutputFormat::Json => print_json(&verdicts)?,
        OutputFormat::Prometheus => print!("{}", render_verdicts(&verdicts)),
    }
    print_summary(&summary.to_string());
    Ok(ok)
}

pub async fn check_fleet(
    fleet: &Fleet,
    engine: HealthEngine,
    targets: Vec<HostTarget>,
    probes: BTreeSet<ProbeKind>,
) -> Vec<HealthVerdict> {
    let transport = fleet.transport();
    let engine = Arc::new(engine);
    let probes = Arc::new(probes);

    let mut verdicts = fleet
        .executor()
        .run(targets, move |target| {
            let transport = Arc::clone(&transport);
            let engine = Arc::clone(&engine);
            let probes = Arc::clone(&probes);
            async move { check_one(&*transport, &engine, &target, &probes).await }
        })
        .await;
    verdicts.sort_by(|a, b| a.target.cmp(&b.target));
    verdicts
}

/// Host probes need a connection; without one they report an error and
/// the site-facing probes still run.
async fn check_one(
    transport: &dyn Transport,
    engine: &HealthEngine,
    target: &HostTarget,
    probes: &BTreeSet<ProbeKind>,
) -> HealthVerdict {
    let needs_host = probes
        .iter()
        .any(|p| matches!(p, ProbeKind::ResourceStats | ProbeKind::Application));
    let conn = if needs_host {
        match transport.connect(target).await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(host = %target, error = %e, "connect failed, host probes skipped");
                None
            }
        }
    } else {
        None
    };

    let verdict = engine.check(target, conn.as_deref(), probes).await;
    if let Some(conn) = conn {
        conn.close().await;
    }
    verdict
}

#[derive(Tabled)]
struct VerdictRow {
    host: String,
    status: HealthStatus,
    http: String,
    cert_days: String,
    warnings: String,
}

fn verdict_row(v: &HealthVerdict) -> VerdictRow {
    let http = match v.payload(ProbeKind::Network) {
        Some(ProbePayload::Network(r)) => format!("{} ({:.0} ms)", r.status_code, r.total_ms),
        _ => String::new(),
    };
    let cert_days = match v.payload(ProbeKind::Tls) {
        Some(ProbePayload::Tls(r)) => r.days_until_expiry.to_string(),
        _ => String::new(),
    };
    VerdictRow {
        host: v.target.to_string(),
        status: v.status,
        http,
        cert_days,
        warnings: truncate(&v.warnings.join("; "), 100),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wpfleet_remote::memory::Response;

    use super::*;
    use crate::commands::test_support::{fleet, site};

    const RUNNING: &str = r#"[{"State":{"Status":"running","Running":true,"StartedAt":"2026-10-19T09:00:00Z"},"RestartCount":1}]"#;
    const STOPPED: &str = r#"[{"State":{"Status":"exited","Running":false,"StartedAt":"2026-10-19T09:00:00Z"},"RestartCount":4}]"#;

    fn engine() -> HealthEngine {
        HealthEngine::new(HealthOptions {
            timeout: Duration::from_secs(2),
            ..HealthOptions::default()
        })
    }

    #[tokio::test]
    async fn container_probe_runs_per_host() {
        let wp01 = site("wp01");
        wp01.on("docker inspect", Response::ok(RUNNING));
        wp01.on("docker stats", Response::ok(r#"{"CPUPerc":"1.00%","MemUsage":"1MiB / 1GiB","MemPerc":"0.10%","NetIO":"1kB / 1kB"}"#));
        let wp02 = site("wp02");
        wp02.on("docker inspect", Response::ok(STOPPED));
        let (fleet, transport) = fleet(&[wp01, wp02]);

        let probes = [ProbeKind::ResourceStats].into_iter().collect();
        let verdicts = check_fleet(&fleet, engine(), fleet.targets("wp%02d:1-3").unwrap(), probes).await;

        assert_eq!(verdicts.len(), 3);
        assert_eq!(verdicts[0].status, HealthStatus::Healthy);
        assert_eq!(verdicts[1].status, HealthStatus::Unhealthy);
        // wp03 has no route, so its host probe is not evaluable.
        assert_eq!(verdicts[2].status, HealthStatus::Unknown);
        assert_eq!(transport.open_now(), 0);
    }

    #[tokio::test]
    async fn site_only_probes_do_not_connect() {
        let (fleet, transport) = fleet(&[site("wp01")]);
        let probes = BTreeSet::new();
        let verdicts = check_fleet(&fleet, engine(), vec![HostTarget::new("wp01")], probes).await;
        assert_eq!(verdicts[0].status, HealthStatus::Unknown);
        assert_eq!(transport.peak_open(), 0);
    }

    #[test]
    fn row_shows_status_and_warnings() {
        let mut verdict = wpfleet_health::reduce(HostTarget::new("wp01"), Default::default());
        verdict.warnings.push("certificate expires in 10 days".into());
        let row = verdict_row(&verdict);
        assert_eq!(row.status, HealthStatus::Unknown);
        assert_eq!(row.warnings, "certificate expires in 10 days");
        assert!(row.http.is_empty());
    }
}
