use std::{
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use duration_string::DurationString;
use http_body_util::combinators::BoxBody;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioTimer},
};
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{self, CryptoProvider},
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::ProxyError;

pub(crate) type HttpClient = Client<HttpsConnector<HttpConnector>, BoxBody<Bytes, hyper::Error>>;

/// Outbound connection settings shared by every route.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", default)]
pub(crate) struct TransportConfig {
    pub(crate) max_idle_per_host: usize,
    pub(crate) idle_timeout: DurationString,
    pub(crate) connect_timeout: DurationString,
    /// Time allowed for the backend to produce response headers.
    pub(crate) request_timeout: DurationString,
    /// Accept any backend certificate. Backends are addressed by in-cluster
    /// service names that rarely match their certificates.
    pub(crate) insecure_skip_verify: bool,
    /// PEM bundle of trusted roots, required when verification is enabled.
    pub(crate) ca_file: Option<PathBuf>,
    /// Offer HTTP/2 over TLS through ALPN.
    pub(crate) http2: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 100,
            idle_timeout: DurationString::from(Duration::from_secs(90)),
            connect_timeout: DurationString::from(Duration::from_secs(10)),
            request_timeout: DurationString::from(Duration::from_secs(60)),
            insecure_skip_verify: true,
            ca_file: None,
            http2: true,
        }
    }
}

impl TransportConfig {
    pub(crate) fn request_timeout(&self) -> Duration {
        self.request_timeout.into()
    }
}

/// Builds the pooled client used for every backend.
pub(crate) fn build_client(config: &TransportConfig) -> Result<HttpClient, ProxyError> {
    let tls = tls_config(config)?;

    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(config.connect_timeout.into()));

    let builder = HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1();
    let https = if config.http2 {
        builder.enable_http2().wrap_connector(http)
    } else {
        builder.wrap_connector(http)
    };

    Ok(Client::builder(TokioExecutor::new())
        .pool_timer(TokioTimer::new())
        .pool_idle_timeout(Duration::from(config.idle_timeout))
        .pool_max_idle_per_host(config.max_idle_per_host)
        .build(https))
}

fn tls_config(config: &TransportConfig) -> Result<ClientConfig, ProxyError> {
    let provider = Arc::new(crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    if config.insecure_skip_verify {
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PermissiveServerCertVerifier { provider }))
            .with_no_client_auth());
    }

    let path = config.ca_file.as_ref().ok_or(ProxyError::MissingCaBundle)?;
    let roots = load_roots(path)?;
    debug!(path = %path.display(), roots = roots.len(), "Loaded backend CA bundle");

    Ok(builder.with_root_certificates(roots).with_no_client_auth())
}

fn load_roots(path: &Path) -> Result<RootCertStore, ProxyError> {
    let ca_bundle = |source| ProxyError::CaBundle {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(ca_bundle)?;
    let mut reader = BufReader::new(file);
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert.map_err(ca_bundle)?)?;
    }

    if roots.is_empty() {
        return Err(ca_bundle(io::Error::new(
            io::ErrorKind::InvalidData,
            "no certificates found",
        )));
    }

    Ok(roots)
}

/// Accepts any backend certificate while still checking handshake
/// signatures.
#[derive(Debug)]
struct PermissiveServerCertVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for PermissiveServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        trace!(?server_name, "Accepting backend certificate");
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
