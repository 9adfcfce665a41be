//! Transport construction.
//!
//! # Responsibilities
//! - Derive the dial/keep-alive policy from the spec's forwarding timeouts
//! - Build the client TLS configuration (classic or SPIFFE, never both)
//! - Negotiate HTTP/2 vs HTTP/1.1 per request: anything carrying a
//!   `Connection: Upgrade` token is pinned to HTTP/1.1 so protocols like
//!   WebSocket keep a dedicated connection

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header;
use futures_util::future::BoxFuture;
use hyper_rustls::{ConfigBuilderExt, FixedServerNameResolver, HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;

use crate::config::schema::TransportSpec;
use crate::errors::ConfigError;
use crate::http::handler::{HttpRequest, HttpResponse};
use crate::transport::registry::TransportRegistry;
use crate::transport::{RoundTripper, TransportError};

type HttpsClient = Client<HttpsConnector<HttpConnector>, Body>;

/// HTTP/2-vs-HTTP/1.1 negotiating round tripper.
///
/// Two pooled clients share nothing: the HTTP/1.1-only one serves requests
/// that need connection upgrades, the ALPN-negotiating one serves the rest.
pub struct SmartTransport {
    h1: HttpsClient,
    h2: Option<HttpsClient>,
    response_header_timeout: Option<Duration>,
}

impl RoundTripper for SmartTransport {
    fn round_trip(
        &self,
        req: HttpRequest,
    ) -> BoxFuture<'static, Result<HttpResponse, TransportError>> {
        let client = match (&self.h2, requests_upgrade(&req)) {
            (Some(h2), false) => h2.clone(),
            _ => self.h1.clone(),
        };
        let timeout = self.response_header_timeout;
        Box::pin(async move {
            let fut = client.request(req);
            let resp = match timeout {
                Some(limit) => tokio::time::timeout(limit, fut)
                    .await
                    .map_err(|_| TransportError::ResponseHeaderTimeout(limit))??,
                None => fut.await?,
            };
            Ok(resp.map(Body::new))
        })
    }
}

/// Whether the request carries a `Connection: Upgrade` token.
fn requests_upgrade(req: &HttpRequest) -> bool {
    req.headers()
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// Build the base (pre-affinity) round tripper for a spec.
///
/// `pooled` disabled produces the dedicated transports used for
/// authentication affinity: each instance owns a private connection pool.
pub fn build_round_tripper(
    name: &str,
    spec: &TransportSpec,
    registry: &TransportRegistry,
    pooled: bool,
) -> Result<Arc<dyn RoundTripper>, ConfigError> {
    if let Some(provider) = registry.connector_for(spec) {
        return provider.build(name, spec);
    }
    if spec.proxy_url.is_some() {
        return Err(ConfigError::Transport(format!(
            "transport \"{name}\": proxy_url requires a registered connector provider"
        )));
    }

    let tls = match build_tls_config(name, spec, registry)? {
        Some(config) => config,
        None => default_tls_config(),
    };

    let mut builder = Client::builder(TokioExecutor::new());
    builder.pool_idle_timeout(Duration::from_secs(
        spec.forwarding_timeouts.idle_conn_secs.max(1),
    ));
    if let Some(max) = spec.max_idle_conns_per_host {
        builder.pool_max_idle_per_host(max);
    }
    if !pooled {
        // A dedicated instance still reuses its own single connection, it
        // just never shares it through the common pool.
        builder.pool_max_idle_per_host(1);
    }

    let h1 = builder.build(connector(spec, tls.clone(), false)?);
    let h2 = if spec.disable_http2 {
        None
    } else {
        Some(builder.build(connector(spec, tls, true)?))
    };

    let timeout = spec.forwarding_timeouts.response_header_secs;
    Ok(Arc::new(SmartTransport {
        h1,
        h2,
        response_header_timeout: (timeout > 0).then(|| Duration::from_secs(timeout)),
    }))
}

fn connector(
    spec: &TransportSpec,
    tls: Arc<ClientConfig>,
    h2: bool,
) -> Result<HttpsConnector<HttpConnector>, ConfigError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(Duration::from_secs(
        spec.forwarding_timeouts.dial_secs.max(1),
    )));
    http.set_keepalive(Some(Duration::from_secs(30)));

    let builder = HttpsConnectorBuilder::new()
        .with_tls_config((*tls).clone())
        .https_or_http();
    let builder = match &spec.server_name {
        Some(name) => {
            let server_name = ServerName::try_from(name.clone()).map_err(|e| {
                ConfigError::Transport(format!("invalid server name {name:?}: {e}"))
            })?;
            builder.with_server_name_resolver(FixedServerNameResolver::new(server_name))
        }
        None => builder,
    };
    Ok(if h2 {
        builder.enable_all_versions().wrap_connector(http)
    } else {
        builder.enable_http1().wrap_connector(http)
    })
}

/// Build the client TLS configuration, or `None` when no TLS field is set.
///
/// SPIFFE and classic TLS fields are mutually exclusive.
pub fn build_tls_config(
    name: &str,
    spec: &TransportSpec,
    registry: &TransportRegistry,
) -> Result<Option<Arc<ClientConfig>>, ConfigError> {
    if !spec.needs_tls() {
        return Ok(None);
    }
    if spec.spiffe.is_some() && spec.has_classic_tls() {
        return Err(ConfigError::ConflictingTls(name.to_string()));
    }

    if let Some(spiffe) = &spec.spiffe {
        let source = registry.spiffe_source().ok_or_else(|| {
            ConfigError::Transport(format!(
                "transport \"{name}\": SPIFFE is enabled but no workload identity source is registered"
            ))
        })?;
        return source.client_config(spiffe).map(|c| Some(Arc::new(c)));
    }

    let builder = if spec.insecure_skip_verify {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
    } else if spec.root_cas.is_empty() {
        ClientConfig::builder()
            .with_native_roots()
            .map_err(|e| ConfigError::Transport(format!("loading native roots: {e}")))?
    } else {
        let mut roots = RootCertStore::empty();
        for path in &spec.root_cas {
            for cert in read_pem_certs(name, path)? {
                roots.add(cert).map_err(|e| {
                    ConfigError::Transport(format!("transport \"{name}\": bad root CA in {path}: {e}"))
                })?;
            }
        }
        ClientConfig::builder().with_root_certificates(roots)
    };

    let config = match spec.certificates.first() {
        Some(pair) => {
            if spec.certificates.len() > 1 {
                tracing::warn!(
                    transport = %name,
                    "Multiple client certificates configured, using the first pair"
                );
            }
            let certs = read_pem_certs(name, &pair.cert_file)?;
            let key = read_pem_key(name, &pair.key_file)?;
            builder.with_client_auth_cert(certs, key).map_err(|e| {
                ConfigError::Transport(format!("transport \"{name}\": client certificate rejected: {e}"))
            })?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(Some(Arc::new(config)))
}

/// TLS configuration used when a spec sets no TLS field but the target URL is
/// still https. An unreadable system trust store degrades to an empty root
/// pool instead of failing the transport.
pub fn default_tls_config() -> Arc<ClientConfig> {
    let config = match ClientConfig::builder().with_native_roots() {
        Ok(builder) => builder.with_no_client_auth(),
        Err(e) => {
            tracing::warn!(error = %e, "Native root store unavailable, TLS verification will fail");
            ClientConfig::builder()
                .with_root_certificates(RootCertStore::empty())
                .with_no_client_auth()
        }
    };
    Arc::new(config)
}

fn read_pem_certs(
    transport: &str,
    path: &str,
) -> Result<Vec<rustls_pki_types::CertificateDer<'static>>, ConfigError> {
    let file = File::open(path).map_err(|e| {
        ConfigError::Transport(format!("transport \"{transport}\": cannot open {path}: {e}"))
    })?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            ConfigError::Transport(format!("transport \"{transport}\": bad PEM in {path}: {e}"))
        })
}

fn read_pem_key(
    transport: &str,
    path: &str,
) -> Result<rustls_pki_types::PrivateKeyDer<'static>, ConfigError> {
    let file = File::open(path).map_err(|e| {
        ConfigError::Transport(format!("transport \"{transport}\": cannot open {path}: {e}"))
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| {
            ConfigError::Transport(format!("transport \"{transport}\": bad key in {path}: {e}"))
        })?
        .ok_or_else(|| {
            ConfigError::Transport(format!("transport \"{transport}\": no private key in {path}"))
        })
}

/// Certificate verifier for `insecure_skip_verify`.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
