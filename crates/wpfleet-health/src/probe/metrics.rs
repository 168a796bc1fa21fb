//! Metrics probe against the application's own Prometheus endpoint.
//!
//! An endpoint that cannot be reached, refuses the token, or returns
//! something that is not exposition text is reported as
//! `available = false`; this probe never fails.

use std::collections::BTreeMap;
use std::time::Duration;

use http::Uri;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::probe::http::{RequestSpec, fetch};
use crate::probe::millis;
use crate::prometheus::{Sample, parse_exposition};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_ms: Option<f64>,
    pub metric_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_p99_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit_ratio: Option<f64>,
}

impl MetricsReport {
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// The metrics URL: scheme and authority of the site plus `path`.
pub fn metrics_url(site_url: &str, path: &str) -> Option<String> {
    let uri: Uri = site_url.parse().ok()?;
    let scheme = uri.scheme_str()?;
    let authority = uri.authority()?;
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Some(format!("{scheme}://{authority}{path}"))
}

pub async fn probe_metrics(
    url: &str,
    token: Option<&str>,
    timeout: Duration,
    verify_tls: bool,
) -> MetricsReport {
    let mut headers = BTreeMap::new();
    if let Some(token) = token {
        headers.insert("authorization".to_string(), format!("Bearer {token}"));
    }
    let spec = RequestSpec {
        url: url.to_string(),
        headers,
        timeout,
        follow_redirects: false,
        verify_tls,
    };

    let fetched = match fetch(&spec).await {
        Ok(f) => f,
        Err(cause) => {
            debug!(%url, %cause, "metrics endpoint unreachable");
            return MetricsReport::unavailable();
        }
    };
    if !(200..300).contains(&fetched.status) {
        debug!(%url, status = fetched.status, "metrics endpoint refused");
        return MetricsReport {
            response_ms: Some(millis(fetched.total)),
            ..MetricsReport::unavailable()
        };
    }

    let text = String::from_utf8_lossy(&fetched.body);
    let samples = match parse_exposition(&text) {
        Ok(samples) => samples,
        Err(e) => {
            debug!(%url, error = %e, "metrics endpoint returned non-exposition text");
            return MetricsReport {
                response_ms: Some(millis(fetched.total)),
                ..MetricsReport::unavailable()
            };
        }
    };

    MetricsReport {
        available: true,
        response_ms: Some(millis(fetched.total)),
        metric_count: samples.len(),
        requests_per_second: first_with_suffix(&samples, "_requests_per_second"),
        latency_p99_ms: first_with_suffix(&samples, "_latency_p99_ms"),
        cache_hit_ratio: first_with_suffix(&samples, "_cache_hit_ratio"),
    }
}

fn first_with_suffix(samples: &[Sample], suffix: &str) -> Option<f64> {
    samples
        .iter()
        .find(|s| s.name.ends_with(suffix))
        .map(|s| s.value)
}
