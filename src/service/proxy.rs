//! Forwarding proxy: one handler per backend server.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the target server
//! - Strip hop-by-hop headers, preserving WebSocket upgrade negotiation
//! - Stream request/response bodies through the pooled transport
//! - Map transport failures onto gateway status codes
//! - Honor client-disconnect cancellation for abort-eligible requests

use std::sync::Arc;

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme, Uri};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::errors::ConfigError;
use crate::http::handler::{
    client_closed_response, status_response, Handler, HttpRequest, HttpResponse,
};
use crate::service::pipelining::AbortEligible;
use crate::transport::{AffinityTransport, RoundTripper, TransportError};

/// Headers scoped to a single hop, never forwarded.
const HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwards requests to one backend server over a shared transport.
pub struct ServerHandler {
    scheme: Scheme,
    authority: Authority,
    base_path: String,
    transport: Arc<AffinityTransport>,
    pass_host_header: bool,
}

impl ServerHandler {
    pub fn new(
        service: &str,
        target: &Url,
        transport: Arc<AffinityTransport>,
        pass_host_header: bool,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidServerUrl {
            service: service.to_string(),
            url: target.to_string(),
            reason,
        };

        let scheme = Scheme::try_from(target.scheme()).map_err(|e| invalid(e.to_string()))?;
        let host = target
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let authority_raw = match target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let authority =
            Authority::try_from(authority_raw.as_str()).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            scheme,
            authority,
            base_path: target.path().trim_end_matches('/').to_string(),
            transport,
            pass_host_header,
        })
    }

    fn outbound_uri(&self, uri: &Uri) -> Uri {
        let pq = match uri.query() {
            Some(query) => format!("{}{}?{query}", self.base_path, uri.path()),
            None => format!("{}{}", self.base_path, uri.path()),
        };
        let pq = PathAndQuery::try_from(pq.as_str())
            .unwrap_or_else(|_| PathAndQuery::from_static("/"));
        let mut parts = uri.clone().into_parts();
        parts.scheme = Some(self.scheme.clone());
        parts.authority = Some(self.authority.clone());
        parts.path_and_query = Some(pq);
        Uri::from_parts(parts).unwrap_or_default()
    }
}

/// Whether the headers carry a `Connection: Upgrade` token.
fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// Strip hop-by-hop headers; an in-progress upgrade keeps its negotiation
/// pair so WebSocket handshakes survive the hop.
fn sanitize_headers(headers: &mut HeaderMap) {
    let upgrade = is_upgrade(headers)
        .then(|| headers.get(header::UPGRADE).cloned())
        .flatten();
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
    if let Some(value) = upgrade {
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(header::UPGRADE, value);
    }
}

/// Map a transport failure onto the response the client sees.
fn status_for(err: &TransportError) -> StatusCode {
    match err {
        TransportError::ResponseHeaderTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        TransportError::NotFound(_) => StatusCode::BAD_GATEWAY,
        TransportError::Client(e) => {
            let mut source: Option<&(dyn std::error::Error + 'static)> = Some(e);
            while let Some(err) = source {
                if let Some(io) = err.downcast_ref::<std::io::Error>() {
                    return match io.kind() {
                        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                            StatusCode::GATEWAY_TIMEOUT
                        }
                        _ => StatusCode::BAD_GATEWAY,
                    };
                }
                if let Some(h) = err.downcast_ref::<hyper::Error>() {
                    if h.is_timeout() {
                        return StatusCode::GATEWAY_TIMEOUT;
                    }
                }
                source = err.source();
            }
            StatusCode::BAD_GATEWAY
        }
    }
}

impl Handler for ServerHandler {
    fn call(&self, req: HttpRequest) -> BoxFuture<'static, HttpResponse> {
        let (mut parts, body) = req.into_parts();

        let original_host = parts
            .headers
            .get(header::HOST)
            .cloned()
            .or_else(|| parts.uri.authority().and_then(|a| a.as_str().parse().ok()));

        parts.uri = self.outbound_uri(&parts.uri);
        sanitize_headers(&mut parts.headers);
        if self.pass_host_header {
            if let Some(host) = original_host {
                parts.headers.insert(header::HOST, host);
            }
        } else {
            parts.headers.remove(header::HOST);
        }

        let abortable = parts.extensions.get::<AbortEligible>().is_some();
        let cancel = parts.extensions.get::<CancellationToken>().cloned();

        let outbound = HttpRequest::from_parts(parts, Body::new(body));
        let transport = self.transport.clone();

        Box::pin(async move {
            let fut = transport.round_trip(outbound);
            let result = match (cancel, abortable) {
                (Some(token), true) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            tracing::debug!("Client closed request, aborting upstream call");
                            return client_closed_response();
                        }
                        result = fut => result,
                    }
                }
                _ => fut.await,
            };

            match result {
                Ok(mut resp) => {
                    if resp.status() != StatusCode::SWITCHING_PROTOCOLS {
                        sanitize_headers(resp.headers_mut());
                    }
                    resp
                }
                Err(e) => {
                    let status = status_for(&e);
                    tracing::debug!(error = %e, status = %status, "Upstream delivery failed");
                    status_response(status, canned_message(status))
                }
            }
        })
    }
}

fn canned_message(status: StatusCode) -> &'static str {
    match status {
        StatusCode::GATEWAY_TIMEOUT => "Gateway Timeout",
        StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable",
        _ => "Bad Gateway",
    }
}
