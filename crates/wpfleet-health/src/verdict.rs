//! Reduction of probe results to one health status.
//!
//! Rules, applied to every enabled probe's result:
//!
//! 1. start at `healthy`;
//! 2. network error or status >= 500 → `unhealthy`; status 4xx → `degraded`;
//! 3. invalid certificate → `unhealthy`; valid but expiring within
//!    [`CERT_EXPIRY_WARNING_DAYS`] → warning, and `degraded` if still `healthy`;
//! 4. container not running → `unhealthy`; memory or CPU high → warning only;
//! 5. database unreachable → `unhealthy`;
//! 6. any other probe error, with nothing stronger fired → `unknown`.
//!
//! `unhealthy` dominates `degraded` dominates `healthy`. The metrics probe is
//! informational and never moves the status.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use wpfleet_core::{HostTarget, ProbeKind};

use crate::error::ProbeError;
use crate::probe::ProbePayload;

pub const CERT_EXPIRY_WARNING_DAYS: i64 = 30;
pub const MEMORY_WARNING_PERCENT: f64 = 90.0;
pub const CPU_WARNING_PERCENT: f64 = 80.0;

/// Outcome of one probe.
pub type ProbeResult = Result<ProbePayload, ProbeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub const ALL: [HealthStatus; 4] = [
        HealthStatus::Healthy,
        HealthStatus::Degraded,
        HealthStatus::Unhealthy,
        HealthStatus::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }

    fn degrade(&mut self) {
        if *self == HealthStatus::Healthy {
            *self = HealthStatus::Degraded;
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The aggregated health of one target. Derived, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct HealthVerdict {
    pub target: HostTarget,
    pub status: HealthStatus,
    pub warnings: Vec<String>,
    #[serde(serialize_with = "serialize_results")]
    pub per_probe: BTreeMap<ProbeKind, ProbeResult>,
    pub checked_at: DateTime<Utc>,
}

impl HealthVerdict {
    pub fn payload(&self, kind: ProbeKind) -> Option<&ProbePayload> {
        self.per_probe.get(&kind).and_then(|r| r.as_ref().ok())
    }

    pub fn error(&self, kind: ProbeKind) -> Option<&ProbeError> {
        self.per_probe.get(&kind).and_then(|r| r.as_ref().err())
    }
}

/// Apply the reduction rules to a set of probe results.
pub fn reduce(target: HostTarget, per_probe: BTreeMap<ProbeKind, ProbeResult>) -> HealthVerdict {
    let mut status = HealthStatus::Healthy;
    let mut warnings = Vec::new();
    let mut unevaluated = false;

    for (kind, result) in &per_probe {
        let payload = match result {
            Ok(payload) => payload,
            Err(e) if *kind == ProbeKind::Network => {
                status = HealthStatus::Unhealthy;
                warnings.push(format!("site unreachable: {}", e.cause));
                continue;
            }
            Err(e) => {
                unevaluated = true;
                warnings.push(e.to_string());
                continue;
            }
        };

        match payload {
            ProbePayload::Network(r) => {
                if r.status_code >= 500 {
                    status = HealthStatus::Unhealthy;
                } else if r.status_code >= 400 {
                    status.degrade();
                }
            }
            ProbePayload::Tls(r) => {
                if !r.valid {
                    status = HealthStatus::Unhealthy;
                    warnings.push(match &r.verify_error {
                        Some(reason) => format!("certificate invalid: {reason}"),
                        None => "certificate invalid".to_string(),
                    });
                } else if r.days_until_expiry < CERT_EXPIRY_WARNING_DAYS {
                    warnings.push(format!(
                        "certificate expires in {} days",
                        r.days_until_expiry
                    ));
                    status.degrade();
                }
            }
            ProbePayload::ResourceStats(s) => {
                if !s.running {
                    status = HealthStatus::Unhealthy;
                    warnings.push(format!("container {} is {}", s.container, s.state));
                }
                if s.memory_percent > MEMORY_WARNING_PERCENT {
                    warnings.push(format!("memory usage at {:.1}%", s.memory_percent));
                }
                if s.cpu_percent > CPU_WARNING_PERCENT {
                    warnings.push(format!("cpu usage at {:.1}%", s.cpu_percent));
                }
            }
            ProbePayload::Application(a) => {
                if !a.database_reachable {
                    status = HealthStatus::Unhealthy;
                    warnings.push("database unreachable".to_string());
                }
            }
            ProbePayload::Metrics(_) => {}
        }
    }

    if per_probe.is_empty() || (unevaluated && status == HealthStatus::Healthy) {
        status = HealthStatus::Unknown;
    }

    HealthVerdict {
        target,
        status,
        warnings,
        per_probe,
        checked_at: Utc::now(),
    }
}

#[derive(Serialize)]
struct ErrorEntry<'a> {
    error: &'a str,
}

fn serialize_results<S: Serializer>(
    results: &BTreeMap<ProbeKind, ProbeResult>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(results.len()))?;
    for (kind, result) in results {
        match result {
            Ok(payload) => map.serialize_entry(kind, payload)?,
            Err(e) => map.serialize_entry(kind, &ErrorEntry { error: &e.cause })?,
        }
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{
        ApplicationReport, ContainerStats, MetricsReport, NetworkReport, PhaseTimings, TlsReport,
    };

    fn network(status_code: u16) -> ProbeResult {
        Ok(ProbePayload::Network(NetworkReport {
            url: "https://wp01/".into(),
            status_code,
            total_ms: 120.0,
            content_length: 5120,
            headers: BTreeMap::new(),
            redirects: Vec::new(),
            timings: PhaseTimings::default(),
        }))
    }

    fn tls(valid: bool, days: i64) -> ProbeResult {
        let now = Utc::now();
        Ok(ProbePayload::Tls(TlsReport {
            valid,
            verify_error: (!valid).then(|| "UnknownIssuer".to_string()),
            issuer: "CN=R3".into(),
            subject: "CN=wp01".into(),
            not_before: now - chrono::TimeDelta::days(60),
            not_after: now + chrono::TimeDelta::days(days),
            days_until_expiry: days,
            protocol: "TLSv1.3".into(),
            cipher: "TLS13_AES_128_GCM_SHA256".into(),
        }))
    }

    fn stats(running: bool, cpu: f64, mem: f64) -> ProbeResult {
        Ok(ProbePayload::ResourceStats(ContainerStats {
            container: "wordpress".into(),
            running,
            state: if running { "running" } else { "exited" }.into(),
            cpu_percent: cpu,
            memory_percent: mem,
            ..ContainerStats::default()
        }))
    }

    fn app(db: bool) -> ProbeResult {
        Ok(ProbePayload::Application(ApplicationReport {
            version: "6.4.3".into(),
            database_reachable: db,
            ..ApplicationReport::default()
        }))
    }

    fn failed(kind: ProbeKind) -> ProbeResult {
        Err(ProbeError::new(kind, "connection reset"))
    }

    fn verdict(results: Vec<(ProbeKind, ProbeResult)>) -> HealthVerdict {
        reduce(HostTarget::new("wp01"), results.into_iter().collect())
    }

    fn all_passing() -> Vec<(ProbeKind, ProbeResult)> {
        vec![
            (ProbeKind::Network, network(200)),
            (ProbeKind::Tls, tls(true, 80)),
            (ProbeKind::ResourceStats, stats(true, 10.0, 40.0)),
            (ProbeKind::Application, app(true)),
        ]
    }

    #[test]
    fn all_passing_is_healthy() {
        let v = verdict(all_passing());
        assert_eq!(v.status, HealthStatus::Healthy);
        assert!(v.warnings.is_empty());
        assert_eq!(v.per_probe.len(), 4);
    }

    #[test]
    fn network_error_beats_passing_tls() {
        let mut results = all_passing();
        results[0].1 = failed(ProbeKind::Network);
        let v = verdict(results);
        assert_eq!(v.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn server_error_is_unhealthy_client_error_degraded() {
        let mut results = all_passing();
        results[0].1 = network(502);
        assert_eq!(verdict(results.clone()).status, HealthStatus::Unhealthy);
        results[0].1 = network(404);
        assert_eq!(verdict(results).status, HealthStatus::Degraded);
    }

    #[test]
    fn expiring_certificate_degrades_with_one_warning() {
        let mut results = all_passing();
        results[1].1 = tls(true, 10);
        let v = verdict(results);
        assert_eq!(v.status, HealthStatus::Degraded);
        assert_eq!(v.warnings, vec!["certificate expires in 10 days"]);
    }

    #[test]
    fn expiring_certificate_does_not_soften_unhealthy() {
        let mut results = all_passing();
        results[0].1 = network(500);
        results[1].1 = tls(true, 10);
        assert_eq!(verdict(results).status, HealthStatus::Unhealthy);
    }

    #[test]
    fn invalid_certificate_is_unhealthy() {
        let mut results = all_passing();
        results[1].1 = tls(false, 80);
        let v = verdict(results);
        assert_eq!(v.status, HealthStatus::Unhealthy);
        assert_eq!(v.warnings, vec!["certificate invalid: UnknownIssuer"]);
    }

    #[test]
    fn stopped_container_is_unhealthy() {
        let mut results = all_passing();
        results[2].1 = stats(false, 0.0, 0.0);
        assert_eq!(verdict(results).status, HealthStatus::Unhealthy);
    }

    #[test]
    fn resource_pressure_only_warns() {
        let mut results = all_passing();
        results[2].1 = stats(true, 95.0, 93.5);
        let v = verdict(results);
        assert_eq!(v.status, HealthStatus::Healthy);
        assert_eq!(v.warnings, vec!["memory usage at 93.5%", "cpu usage at 95.0%"]);
    }

    #[test]
    fn unreachable_database_is_unhealthy() {
        let mut results = all_passing();
        results[3].1 = app(false);
        assert_eq!(verdict(results).status, HealthStatus::Unhealthy);
    }

    #[test]
    fn unevaluated_probe_makes_otherwise_healthy_unknown() {
        let mut results = all_passing();
        results[2].1 = failed(ProbeKind::ResourceStats);
        let v = verdict(results);
        assert_eq!(v.status, HealthStatus::Unknown);
        assert_eq!(v.warnings.len(), 1);
    }

    #[test]
    fn unevaluated_probe_does_not_mask_stronger_signal() {
        let mut results = all_passing();
        results[1].1 = tls(true, 5);
        results[3].1 = failed(ProbeKind::Application);
        assert_eq!(verdict(results).status, HealthStatus::Degraded);
    }

    #[test]
    fn no_probes_is_unknown() {
        assert_eq!(verdict(Vec::new()).status, HealthStatus::Unknown);
    }

    #[test]
    fn metrics_never_move_status() {
        let mut results = all_passing();
        results.push((ProbeKind::Metrics, Ok(ProbePayload::Metrics(MetricsReport::unavailable()))));
        assert_eq!(verdict(results).status, HealthStatus::Healthy);
    }

    #[test]
    fn verdict_serializes_errors_inline() {
        let mut results = all_passing();
        results[3].1 = failed(ProbeKind::Application);
        let json = serde_json::to_value(verdict(results)).unwrap();
        assert_eq!(json["status"], "unknown");
        assert_eq!(json["target"]["host"], "wp01");
        assert_eq!(json["per_probe"]["network"]["status_code"], 200);
        assert_eq!(json["per_probe"]["application"]["error"], "connection reset");
    }
}
