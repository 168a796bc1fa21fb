//! Network probe — one HTTP(S) request with per-phase timings.
//!
//! The request is driven by hand (resolve, connect, TLS, hyper http1) so
//! each phase can be timed separately. Redirects are followed up to
//! [`MAX_REDIRECTS`] hops when enabled; phase durations are summed over
//! every hop.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{Request, Uri};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use wpfleet_core::ProbeKind;

use crate::error::ProbeError;
use crate::probe::millis;
use crate::probe::tls::client_config;

pub const MAX_REDIRECTS: usize = 10;
const USER_AGENT: &str = concat!("wpfleet/", env!("CARGO_PKG_VERSION"));

/// Milliseconds spent in each phase of the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub dns_ms: f64,
    pub connect_ms: f64,
    pub tls_ms: f64,
    pub first_byte_ms: f64,
    pub transfer_ms: f64,
}

impl PhaseTimings {
    fn add(&mut self, other: &PhaseTimings) {
        self.dns_ms += other.dns_ms;
        self.connect_ms += other.connect_ms;
        self.tls_ms += other.tls_ms;
        self.first_byte_ms += other.first_byte_ms;
        self.transfer_ms += other.transfer_ms;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkReport {
    /// The URL that produced the final response.
    pub url: String,
    pub status_code: u16,
    pub total_ms: f64,
    pub content_length: u64,
    pub headers: BTreeMap<String, String>,
    /// Every `Location` followed, in order.
    pub redirects: Vec<String>,
    pub timings: PhaseTimings,
}

/// Request parameters.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub verify_tls: bool,
}

/// A completed exchange: final response plus the hops that led to it.
#[derive(Debug)]
pub(crate) struct Fetched {
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub redirects: Vec<String>,
    pub timings: PhaseTimings,
    pub total: Duration,
}

/// Run the network probe.
pub async fn probe_network(spec: &RequestSpec) -> Result<NetworkReport, ProbeError> {
    let fetched = fetch(spec)
        .await
        .map_err(|cause| ProbeError::new(ProbeKind::Network, cause))?;
    debug!(url = %fetched.url, status = fetched.status, total_ms = millis(fetched.total), "network probe");
    Ok(NetworkReport {
        url: fetched.url,
        status_code: fetched.status,
        total_ms: millis(fetched.total),
        content_length: fetched.body.len() as u64,
        headers: fetched.headers,
        redirects: fetched.redirects,
        timings: fetched.timings,
    })
}

/// Perform the request, bounded by `spec.timeout`.
pub(crate) async fn fetch(spec: &RequestSpec) -> Result<Fetched, String> {
    match tokio::time::timeout(spec.timeout, fetch_inner(spec)).await {
        Ok(result) => result,
        Err(_) => Err(format!("timed out after {:?}", spec.timeout)),
    }
}

async fn fetch_inner(spec: &RequestSpec) -> Result<Fetched, String> {
    let started = Instant::now();
    let mut uri: Uri = spec
        .url
        .parse()
        .map_err(|e| format!("invalid url {}: {e}", spec.url))?;
    let mut redirects = Vec::new();
    let mut timings = PhaseTimings::default();

    loop {
        let hop = request_once(&uri, spec).await?;
        timings.add(&hop.timings);

        let location = hop
            .headers
            .get("location")
            .filter(|_| spec.follow_redirects && (300..400).contains(&hop.status));
        if let Some(location) = location {
            if redirects.len() >= MAX_REDIRECTS {
                return Err(format!("more than {MAX_REDIRECTS} redirects"));
            }
            let next = resolve_location(&uri, location)?;
            debug!(from = %uri, to = %next, status = hop.status, "following redirect");
            redirects.push(next.to_string());
            uri = next;
            continue;
        }

        return Ok(Fetched {
            url: uri.to_string(),
            status: hop.status,
            headers: hop.headers,
            body: hop.body,
            redirects,
            timings,
            total: started.elapsed(),
        });
    }
}

struct Hop {
    status: u16,
    headers: BTreeMap<String, String>,
    body: Bytes,
    timings: PhaseTimings,
}

async fn request_once(uri: &Uri, spec: &RequestSpec) -> Result<Hop, String> {
    let https = match uri.scheme_str() {
        Some("https") => true,
        Some("http") => false,
        other => return Err(format!("unsupported scheme {other:?}")),
    };
    let host = uri.host().ok_or_else(|| format!("url {uri} has no host"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });
    let mut timings = PhaseTimings::default();

    let phase = Instant::now();
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| format!("dns lookup for {host} failed: {e}"))?
        .collect();
    timings.dns_ms = millis(phase.elapsed());

    let phase = Instant::now();
    let tcp = connect_any(&addrs).await?;
    timings.connect_ms = millis(phase.elapsed());

    let request = build_request(uri, spec)?;

    let (status, headers, body) = if https {
        let phase = Instant::now();
        let config = client_config(spec.verify_tls)?;
        let server_name = rustls::pki_types::ServerName::try_from(host.clone())
            .map_err(|e| format!("invalid server name {host}: {e}"))?;
        let tls = tokio_rustls::TlsConnector::from(config)
            .connect(server_name, tcp)
            .await
            .map_err(|e| format!("tls handshake with {host} failed: {e}"))?;
        timings.tls_ms = millis(phase.elapsed());
        exchange(tls, request, &mut timings).await?
    } else {
        exchange(tcp, request, &mut timings).await?
    };

    Ok(Hop {
        status,
        headers,
        body,
        timings,
    })
}

/// Try each resolved address in turn.
pub(crate) async fn connect_any(addrs: &[SocketAddr]) -> Result<TcpStream, String> {
    let mut last_err = "no addresses resolved".to_string();
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = format!("connect to {addr} failed: {e}"),
        }
    }
    Err(last_err)
}

fn build_request(uri: &Uri, spec: &RequestSpec) -> Result<Request<Empty<Bytes>>, String> {
    let authority = uri
        .authority()
        .map(|a| a.as_str().to_string())
        .ok_or_else(|| format!("url {uri} has no authority"))?;
    let path = uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");

    let mut builder = Request::builder()
        .method("GET")
        .uri(path)
        .header("host", authority)
        .header("user-agent", USER_AGENT)
        .header("accept", "*/*");
    for (name, value) in &spec.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Empty::<Bytes>::new())
        .map_err(|e| format!("invalid request: {e}"))
}

async fn exchange<S>(
    io: S,
    request: Request<Empty<Bytes>>,
    timings: &mut PhaseTimings,
) -> Result<(u16, BTreeMap<String, String>, Bytes), String>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(|e| format!("http handshake failed: {e}"))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let phase = Instant::now();
    let response = sender
        .send_request(request)
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    timings.first_byte_ms = millis(phase.elapsed());

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let phase = Instant::now();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| format!("reading body failed: {e}"))?
        .to_bytes();
    timings.transfer_ms = millis(phase.elapsed());

    Ok((status, headers, body))
}

/// Resolve a `Location` header against the URL that returned it.
fn resolve_location(base: &Uri, location: &str) -> Result<Uri, String> {
    let invalid = |e: http::Error| format!("invalid redirect location {location}: {e}");
    if location.starts_with("http://") || location.starts_with("https://") {
        return location
            .parse()
            .map_err(|e: http::uri::InvalidUri| invalid(e.into()));
    }

    let scheme = base.scheme_str().unwrap_or("http");
    let authority = base.authority().map(|a| a.as_str()).unwrap_or_default();
    let path = if location.starts_with('/') {
        location.to_string()
    } else {
        let dir = base.path().rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        format!("{dir}/{location}")
    };
    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path)
        .build()
        .map_err(invalid)
}
