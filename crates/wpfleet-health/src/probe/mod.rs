//! The independent health probes.
//!
//! Each probe reads external signals only and returns either a typed report
//! or a [`ProbeError`]. Probes never retry and never depend on each other.
//!
//! | probe            | source                                   |
//! |------------------|------------------------------------------|
//! | `network`        | HTTP(S) request from this machine        |
//! | `tls`            | TLS handshake from this machine          |
//! | `resource-stats` | `docker inspect` / `docker stats` on host |
//! | `application`    | `wp` (wp-cli) inside the container       |
//! | `metrics`        | application metrics endpoint             |

pub mod container;
pub mod http;
pub mod metrics;
pub mod tls;
pub mod wordpress;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wpfleet_core::{ConfigError, FleetConfig, HostTarget};

pub use container::ContainerStats;
pub use http::{NetworkReport, PhaseTimings};
pub use metrics::MetricsReport;
pub use tls::TlsReport;
pub use wordpress::ApplicationReport;

/// The success payload of one probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "probe", rename_all = "kebab-case")]
pub enum ProbePayload {
    Network(NetworkReport),
    Tls(TlsReport),
    ResourceStats(ContainerStats),
    Application(ApplicationReport),
    Metrics(MetricsReport),
}

/// Inputs shared by every probe, resolved once per invocation.
#[derive(Debug, Clone)]
pub struct HealthOptions {
    /// Site URL; `{host}` is replaced with the target hostname.
    pub url_template: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub verify_tls: bool,
    /// Container used when the target names no workload.
    pub container: String,
    pub metrics_path: String,
    pub metrics_token: Option<String>,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            url_template: "https://{host}/".to_string(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(10),
            follow_redirects: true,
            verify_tls: true,
            container: "wordpress".to_string(),
            metrics_path: "/metrics".to_string(),
            metrics_token: None,
        }
    }
}

impl HealthOptions {
    pub fn from_config(config: &FleetConfig) -> Result<Self, ConfigError> {
        let health = &config.health;
        Ok(Self {
            url_template: health.url.clone(),
            headers: health.headers.clone(),
            timeout: config.health_timeout()?,
            follow_redirects: health.follow_redirects,
            verify_tls: health.verify_tls,
            container: config.workload.container.clone(),
            metrics_path: health
                .metrics_path
                .clone()
                .unwrap_or_else(|| "/metrics".to_string()),
            metrics_token: health.metrics_token.clone(),
        })
    }

    pub fn site_url(&self, target: &HostTarget) -> String {
        self.url_template.replace("{host}", target.host())
    }

    pub fn container_for<'a>(&'a self, target: &'a HostTarget) -> &'a str {
        target.workload().unwrap_or(&self.container)
    }
}

/// Whole days from `now` until `until`, negative once passed.
pub(crate) fn days_between(now: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
    (until - now).num_days()
}

pub(crate) fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Canned HTTP responses over a local listener.

    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    pub fn response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut out = format!("HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n", body.len());
        for (name, value) in headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.push_str(body);
        out
    }

    /// Serve `responses` to successive connections; the last one repeats.
    /// Returns the address and a counter of requests seen.
    pub async fn serve(responses: Vec<String>) -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let reply = responses[n.min(responses.len() - 1)].clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let _ = stream.write_all(reply.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        (addr, hits)
    }

    /// Accept connections and never answer.
    pub async fn black_hole() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        addr
    }
}
