//! Runs the enabled probes against one target and reduces them.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use wpfleet_core::{HostTarget, ProbeKind};
use wpfleet_remote::{BoxFuture, Connection};

use crate::error::ProbeError;
use crate::probe::container::probe_container;
use crate::probe::http::{RequestSpec, probe_network};
use crate::probe::metrics::{metrics_url, probe_metrics};
use crate::probe::tls::TlsProbe;
use crate::probe::wordpress::probe_application;
use crate::probe::{HealthOptions, ProbePayload};
use crate::verdict::{HealthStatus, HealthVerdict, ProbeResult, reduce};

/// Produces a verdict for a target. The mutation controller gates on one
/// of these.
pub trait VerdictSource: Send + Sync {
    fn evaluate<'a>(
        &'a self,
        target: &'a HostTarget,
        conn: Option<&'a dyn Connection>,
        probes: &'a BTreeSet<ProbeKind>,
    ) -> BoxFuture<'a, HealthVerdict>;
}

/// The real probe set.
#[derive(Clone)]
pub struct HealthEngine {
    options: HealthOptions,
    tls: TlsProbe,
}

impl HealthEngine {
    pub fn new(options: HealthOptions) -> Self {
        Self {
            options,
            tls: TlsProbe::default(),
        }
    }

    pub fn with_tls_probe(mut self, tls: TlsProbe) -> Self {
        self.tls = tls;
        self
    }

    pub fn options(&self) -> &HealthOptions {
        &self.options
    }

    /// Run every enabled probe concurrently and reduce the results.
    ///
    /// Probes that need the host (`resource-stats`, `application`) fail
    /// with an error result when `conn` is `None`.
    pub async fn check(
        &self,
        target: &HostTarget,
        conn: Option<&dyn Connection>,
        probes: &BTreeSet<ProbeKind>,
    ) -> HealthVerdict {
        let url = self.options.site_url(target);
        let container = self.options.container_for(target);
        let timeout = self.options.timeout;
        let enabled = |kind| probes.contains(&kind);

        let network = run_if(enabled(ProbeKind::Network), async {
            let spec = RequestSpec {
                url: url.clone(),
                headers: self.options.headers.clone(),
                timeout,
                follow_redirects: self.options.follow_redirects,
                verify_tls: self.options.verify_tls,
            };
            probe_network(&spec).await.map(ProbePayload::Network)
        });
        let tls = run_if(enabled(ProbeKind::Tls), async {
            self.tls.probe(&url, timeout).await.map(ProbePayload::Tls)
        });
        let stats = run_if(enabled(ProbeKind::ResourceStats), async {
            match conn {
                Some(conn) => with_timeout(ProbeKind::ResourceStats, timeout, probe_container(conn, container))
                    .await
                    .map(ProbePayload::ResourceStats),
                None => Err(no_connection(ProbeKind::ResourceStats)),
            }
        });
        let application = run_if(enabled(ProbeKind::Application), async {
            match conn {
                Some(conn) => with_timeout(ProbeKind::Application, timeout, probe_application(conn, container))
                    .await
                    .map(ProbePayload::Application),
                None => Err(no_connection(ProbeKind::Application)),
            }
        });
        let metrics = run_if(enabled(ProbeKind::Metrics), async {
            let report = match metrics_url(&url, &self.options.metrics_path) {
                Some(metrics) => {
                    probe_metrics(
                        &metrics,
                        self.options.metrics_token.as_deref(),
                        timeout,
                        self.options.verify_tls,
                    )
                    .await
                }
                None => crate::probe::MetricsReport::unavailable(),
            };
            Ok(ProbePayload::Metrics(report))
        });

        let (network, tls, stats, application, metrics) =
            tokio::join!(network, tls, stats, application, metrics);

        let per_probe: BTreeMap<ProbeKind, ProbeResult> = [
            (ProbeKind::Network, network),
            (ProbeKind::Tls, tls),
            (ProbeKind::ResourceStats, stats),
            (ProbeKind::Application, application),
            (ProbeKind::Metrics, metrics),
        ]
        .into_iter()
        .filter_map(|(kind, result)| result.map(|r| (kind, r)))
        .collect();

        let verdict = reduce(target.clone(), per_probe);
        match verdict.status {
            HealthStatus::Healthy => debug!(host = %target, "verdict healthy"),
            HealthStatus::Degraded | HealthStatus::Unknown => {
                warn!(host = %target, status = %verdict.status, warnings = ?verdict.warnings, "verdict not healthy");
            }
            HealthStatus::Unhealthy => {
                warn!(host = %target, warnings = ?verdict.warnings, "verdict unhealthy");
            }
        }
        verdict
    }
}

impl VerdictSource for HealthEngine {
    fn evaluate<'a>(
        &'a self,
        target: &'a HostTarget,
        conn: Option<&'a dyn Connection>,
        probes: &'a BTreeSet<ProbeKind>,
    ) -> BoxFuture<'a, HealthVerdict> {
        Box::pin(self.check(target, conn, probes))
    }
}

async fn run_if<F>(enabled: bool, fut: F) -> Option<ProbeResult>
where
    F: Future<Output = ProbeResult>,
{
    if enabled { Some(fut.await) } else { None }
}

fn no_connection(kind: ProbeKind) -> ProbeError {
    ProbeError::new(kind, "no connection to host")
}

async fn with_timeout<T, F>(kind: ProbeKind, timeout: Duration, fut: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or_else(|_| Err(ProbeError::new(kind, format!("timed out after {timeout:?}"))))
}
