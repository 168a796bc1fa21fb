//! Prometheus text exposition format.
//!
//! Parses the metrics an application exposes and renders health verdicts
//! as gauges for a textfile collector or a scrape endpoint.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use wpfleet_core::ProbeKind;

use crate::probe::ProbePayload;
use crate::verdict::{HealthStatus, HealthVerdict};

/// One sample line.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

/// Parse exposition text. Comment and blank lines are skipped; any other
/// malformed line fails the whole parse.
pub fn parse_exposition(text: &str) -> Result<Vec<Sample>, String> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| parse_sample(line.trim()).map_err(|e| format!("line {}: {e}", n + 1)))
        .collect()
}

fn parse_sample(line: &str) -> Result<Sample, String> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or_else(|| "missing value".to_string())?;
    let name = &line[..name_end];
    if !valid_name(name) {
        return Err(format!("invalid metric name {name:?}"));
    }

    let mut rest = &line[name_end..];
    let mut labels = BTreeMap::new();
    if let Some(after_brace) = rest.strip_prefix('{') {
        let (parsed, remainder) = parse_labels(after_brace)?;
        labels = parsed;
        rest = remainder;
    }

    let mut fields = rest.split_whitespace();
    let raw = fields.next().ok_or_else(|| "missing value".to_string())?;
    let value = parse_value(raw)?;
    // An optional timestamp may follow; nothing else may.
    if let Some(ts) = fields.next() {
        ts.parse::<i64>()
            .map_err(|_| format!("unexpected trailing token {ts:?}"))?;
    }
    if fields.next().is_some() {
        return Err("too many fields".to_string());
    }

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
    })
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn parse_value(raw: &str) -> Result<f64, String> {
    match raw {
        "+Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => raw.parse().map_err(|_| format!("invalid value {raw:?}")),
    }
}

/// Parse `k="v",...}` and return the labels plus the text after `}`.
fn parse_labels(input: &str) -> Result<(BTreeMap<String, String>, &str), String> {
    let mut labels = BTreeMap::new();
    let mut rest = input.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }
        let eq = rest
            .find('=')
            .ok_or_else(|| "label without '='".to_string())?;
        let key = rest[..eq].trim();
        if !valid_name(key) {
            return Err(format!("invalid label name {key:?}"));
        }
        let after_eq = rest[eq + 1..].trim_start();
        let body = after_eq
            .strip_prefix('"')
            .ok_or_else(|| format!("label {key} value is not quoted"))?;

        let mut value = String::new();
        let mut chars = body.char_indices();
        let end = loop {
            match chars.next() {
                Some((i, '"')) => break i,
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, c)) => value.push(c),
                    None => return Err("unterminated escape".to_string()),
                },
                Some((_, c)) => value.push(c),
                None => return Err(format!("unterminated value for label {key}")),
            }
        };
        labels.insert(key.to_string(), value);

        rest = body[end + 1..].trim_start();
        if let Some(after_comma) = rest.strip_prefix(',') {
            rest = after_comma.trim_start();
        } else if !rest.starts_with('}') {
            return Err("expected ',' or '}' after label".to_string());
        }
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn gauge<F>(out: &mut String, name: &str, help: &str, verdicts: &[HealthVerdict], value: F)
where
    F: Fn(&HealthVerdict) -> Option<f64>,
{
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    for v in verdicts {
        if let Some(x) = value(v) {
            let _ = writeln!(out, "{name}{{host=\"{}\"}} {x}", escape_label(&v.target.to_string()));
        }
    }
}

/// Render verdicts as gauges with a `host` label.
pub fn render_verdicts(verdicts: &[HealthVerdict]) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# HELP wpfleet_health_status Current verdict, one series per status.");
    let _ = writeln!(out, "# TYPE wpfleet_health_status gauge");
    for v in verdicts {
        let host = escape_label(&v.target.to_string());
        for status in HealthStatus::ALL {
            let _ = writeln!(
                out,
                "wpfleet_health_status{{host=\"{host}\",status=\"{status}\"}} {}",
                u8::from(v.status == status)
            );
        }
    }

    gauge(&mut out, "wpfleet_health_warnings", "Number of verdict warnings.", verdicts, |v| {
        Some(v.warnings.len() as f64)
    });
    gauge(&mut out, "wpfleet_http_status_code", "HTTP status of the site request.", verdicts, |v| {
        match v.payload(ProbeKind::Network)? {
            ProbePayload::Network(r) => Some(f64::from(r.status_code)),
            _ => None,
        }
    });
    gauge(&mut out, "wpfleet_http_response_ms", "Total site response time in milliseconds.", verdicts, |v| {
        match v.payload(ProbeKind::Network)? {
            ProbePayload::Network(r) => Some(r.total_ms),
            _ => None,
        }
    });
    gauge(&mut out, "wpfleet_tls_days_until_expiry", "Days until the site certificate expires.", verdicts, |v| {
        match v.payload(ProbeKind::Tls)? {
            ProbePayload::Tls(r) => Some(r.days_until_expiry as f64),
            _ => None,
        }
    });
    gauge(&mut out, "wpfleet_container_cpu_percent", "Container CPU usage percent.", verdicts, |v| {
        match v.payload(ProbeKind::ResourceStats)? {
            ProbePayload::ResourceStats(s) => Some(s.cpu_percent),
            _ => None,
        }
    });
    gauge(&mut out, "wpfleet_container_memory_percent", "Container memory usage percent.", verdicts, |v| {
        match v.payload(ProbeKind::ResourceStats)? {
            ProbePayload::ResourceStats(s) => Some(s.memory_percent),
            _ => None,
        }
    });
    gauge(&mut out, "wpfleet_container_restart_count", "Container restart count.", verdicts, |v| {
        match v.payload(ProbeKind::ResourceStats)? {
            ProbePayload::ResourceStats(s) => Some(f64::from(s.restart_count)),
            _ => None,
        }
    });
    gauge(&mut out, "wpfleet_database_reachable", "1 if WordPress can reach its database.", verdicts, |v| {
        match v.payload(ProbeKind::Application)? {
            ProbePayload::Application(a) => Some(if a.database_reachable { 1.0 } else { 0.0 }),
            _ => None,
        }
    });

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::probe::{ContainerStats, NetworkReport, PhaseTimings};
    use crate::verdict::reduce;
    use wpfleet_core::HostTarget;

    #[test]
    fn parse_samples_with_labels_and_timestamps() {
        let text = "# HELP a An a.\n# TYPE a gauge\na 1\nb{route=\"/wp-json\",code=\"200\"} 2.5 1700000000000\n\nc_total{x=\"q\\\"uote\"} +Inf\n";
        let samples = parse_exposition(text).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].name, "a");
        assert_eq!(samples[1].labels.get("route").map(String::as_str), Some("/wp-json"));
        assert_eq!(samples[1].value, 2.5);
        assert_eq!(samples[2].labels.get("x").map(String::as_str), Some("q\"uote"));
        assert!(samples[2].value.is_infinite());
    }

    #[test]
    fn html_is_not_exposition() {
        assert!(parse_exposition("<!DOCTYPE html>\n<html></html>").is_err());
        assert!(parse_exposition("a{b=c} 1").is_err());
        assert!(parse_exposition("a 1 2 3").is_err());
        assert!(parse_exposition("").unwrap().is_empty());
    }

    fn sample_verdicts() -> Vec<HealthVerdict> {
        let healthy = reduce(
            HostTarget::new("wp01"),
            [
                (
                    ProbeKind::Network,
                    Ok(ProbePayload::Network(NetworkReport {
                        url: "https://wp01/".into(),
                        status_code: 200,
                        total_ms: 85.5,
                        content_length: 1024,
                        headers: BTreeMap::new(),
                        redirects: Vec::new(),
                        timings: PhaseTimings::default(),
                    })),
                ),
                (
                    ProbeKind::ResourceStats,
                    Ok(ProbePayload::ResourceStats(ContainerStats {
                        container: "wordpress".into(),
                        running: true,
                        state: "running".into(),
                        restart_count: 3,
                        cpu_percent: 12.5,
                        ..ContainerStats::default()
                    })),
                ),
            ]
            .into_iter()
            .collect(),
        );
        let down = reduce(
            HostTarget::new("wp02"),
            [(ProbeKind::Network, Err(ProbeError::new(ProbeKind::Network, "refused")))]
                .into_iter()
                .collect(),
        );
        vec![healthy, down]
    }

    #[test]
    fn render_one_hot_status() {
        let out = render_verdicts(&sample_verdicts());
        assert!(out.contains("wpfleet_health_status{host=\"wp01\",status=\"healthy\"} 1"));
        assert!(out.contains("wpfleet_health_status{host=\"wp01\",status=\"unhealthy\"} 0"));
        assert!(out.contains("wpfleet_health_status{host=\"wp02\",status=\"unhealthy\"} 1"));
    }

    #[test]
    fn render_skips_missing_payloads() {
        let out = render_verdicts(&sample_verdicts());
        assert!(out.contains("wpfleet_http_status_code{host=\"wp01\"} 200"));
        assert!(out.contains("wpfleet_http_response_ms{host=\"wp01\"} 85.5"));
        assert!(out.contains("wpfleet_container_restart_count{host=\"wp01\"} 3"));
        assert!(!out.contains("wpfleet_http_status_code{host=\"wp02\"}"));
        assert!(out.contains("wpfleet_health_warnings{host=\"wp02\"} 1"));
    }

    #[test]
    fn rendered_output_parses_back() {
        let out = render_verdicts(&sample_verdicts());
        let samples = parse_exposition(&out).unwrap();
        assert!(samples.iter().all(|s| s.labels.contains_key("host")));
    }

    #[test]
    fn render_empty_still_declares_types() {
        let out = render_verdicts(&[]);
        assert!(out.contains("# TYPE wpfleet_health_status gauge"));
        assert!(parse_exposition(&out).unwrap().is_empty());
    }
}
