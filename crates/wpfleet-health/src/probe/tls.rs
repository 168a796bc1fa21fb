//! TLS certificate probe.
//!
//! The handshake always completes without verification so that an invalid
//! certificate can still be inspected; validity is then decided separately
//! by the webpki verifier against the configured roots.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use http::Uri;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::ServerCertVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ProtocolVersion, RootCertStore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use wpfleet_core::ProbeKind;

use crate::error::ProbeError;
use crate::probe::days_between;
use crate::probe::http::connect_any;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsReport {
    pub valid: bool,
    /// Why verification failed, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_error: Option<String>,
    pub issuer: String,
    pub subject: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_until_expiry: i64,
    pub protocol: String,
    pub cipher: String,
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client config for outbound requests; `verify = false` accepts any
/// certificate.
pub(crate) fn client_config(verify: bool) -> Result<Arc<ClientConfig>, String> {
    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| format!("tls protocol version error: {e}"))?;
    let config = if verify {
        builder
            .with_root_certificates(webpki_root_store())
            .with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
            .with_no_client_auth()
    };
    Ok(Arc::new(config))
}

fn webpki_root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

/// Inspects the certificate a site presents.
#[derive(Clone)]
pub struct TlsProbe {
    roots: Arc<RootCertStore>,
}

impl Default for TlsProbe {
    fn default() -> Self {
        Self::with_roots(webpki_root_store())
    }
}

impl TlsProbe {
    /// Judge validity against `roots` instead of the Mozilla set.
    pub fn with_roots(roots: RootCertStore) -> Self {
        Self {
            roots: Arc::new(roots),
        }
    }

    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<TlsReport, ProbeError> {
        match tokio::time::timeout(timeout, self.inspect(url)).await {
            Ok(result) => result.map_err(|cause| ProbeError::new(ProbeKind::Tls, cause)),
            Err(_) => Err(ProbeError::new(
                ProbeKind::Tls,
                format!("timed out after {timeout:?}"),
            )),
        }
    }

    async fn inspect(&self, url: &str) -> Result<TlsReport, String> {
        let uri: Uri = url.parse().map_err(|e| format!("invalid url {url}: {e}"))?;
        if uri.scheme_str() != Some("https") {
            return Err(format!("{url} is not an https url"));
        }
        let host = uri
            .host()
            .ok_or_else(|| format!("url {url} has no host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(443);

        let addrs: Vec<_> = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| format!("dns lookup for {host} failed: {e}"))?
            .collect();
        let tcp = connect_any(&addrs).await?;

        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| format!("invalid server name {host}: {e}"))?;
        let stream = tokio_rustls::TlsConnector::from(client_config(false)?)
            .connect(server_name.clone(), tcp)
            .await
            .map_err(|e| format!("tls handshake with {host} failed: {e}"))?;

        let (_, session) = stream.get_ref();
        let chain: Vec<CertificateDer<'static>> = session
            .peer_certificates()
            .map(<[_]>::to_vec)
            .unwrap_or_default();
        let (leaf, intermediates) = chain
            .split_first()
            .ok_or_else(|| "server presented no certificate".to_string())?;

        let protocol = session
            .protocol_version()
            .map(protocol_name)
            .unwrap_or_default();
        let cipher = session
            .negotiated_cipher_suite()
            .map(|s| format!("{:?}", s.suite()))
            .unwrap_or_default();

        let verify_error = self.verify(leaf, intermediates, &server_name).err();
        let details = parse_certificate(leaf)?;
        let days_until_expiry = days_between(Utc::now(), details.not_after);

        debug!(%host, valid = verify_error.is_none(), days_until_expiry, %protocol, "tls probe");
        Ok(TlsReport {
            valid: verify_error.is_none(),
            verify_error,
            issuer: details.issuer,
            subject: details.subject,
            not_before: details.not_before,
            not_after: details.not_after,
            days_until_expiry,
            protocol,
            cipher,
        })
    }

    fn verify(
        &self,
        leaf: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
    ) -> Result<(), String> {
        let verifier = WebPkiServerVerifier::builder_with_provider(Arc::clone(&self.roots), provider())
            .build()
            .map_err(|e| format!("verifier unavailable: {e}"))?;
        verifier
            .verify_server_cert(leaf, intermediates, server_name, &[], UnixTime::now())
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

struct CertDetails {
    issuer: String,
    subject: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

fn parse_certificate(der: &CertificateDer<'_>) -> Result<CertDetails, String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
        .map_err(|e| format!("unparseable certificate: {e}"))?;
    let validity = cert.validity();
    let to_utc = |ts: i64| {
        DateTime::<Utc>::from_timestamp(ts, 0)
            .ok_or_else(|| format!("certificate timestamp {ts} out of range"))
    };
    Ok(CertDetails {
        issuer: cert.issuer().to_string(),
        subject: cert.subject().to_string(),
        not_before: to_utc(validity.not_before.timestamp())?,
        not_after: to_utc(validity.not_after.timestamp())?,
    })
}

fn protocol_name(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::TLSv1_3 => "TLSv1.3".to_string(),
        ProtocolVersion::TLSv1_2 => "TLSv1.2".to_string(),
        other => format!("{other:?}"),
    }
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    /// Accepts any certificate. Used when verification is switched off and
    /// to complete handshakes whose certificate is inspected afterwards.
    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
