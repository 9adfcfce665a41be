//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every member of a balancer handle
//! - Toggle member participation without touching configured weights
//! - Carry an independent probe timeout, unrelated to client requests
//!
//! Checks are registered during the service build but launched only after
//! the whole generation is built, so every service's member set is fully
//! populated before the first probe fires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::ClientConfig;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::schema::HealthCheckSpec;
use crate::service::balancer::Balancer;
use crate::transport::builder::default_tls_config;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// One service's periodic probe, bound to its balancer handle.
pub struct HealthCheck {
    service: String,
    balancer: Arc<Balancer>,
    path: String,
    headers: HashMap<String, String>,
    interval: Duration,
    timeout: Duration,
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

/// The probe path always starts with a slash so it concatenates cleanly
/// onto the member's base URL.
fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Resolve an optional seconds override, logging and falling back to the
/// default when it is non-positive.
fn effective_duration(
    service: &str,
    what: &str,
    override_secs: Option<i64>,
    default: Duration,
) -> Duration {
    match override_secs {
        Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
        Some(secs) => {
            tracing::error!(
                service = %service,
                "Health check {what} smaller than or equal to 0, using default of {default:?} instead of {secs}s"
            );
            default
        }
        None => default,
    }
}

impl HealthCheck {
    pub fn new(
        service: impl Into<String>,
        spec: &HealthCheckSpec,
        balancer: Arc<Balancer>,
        tls: Option<Arc<ClientConfig>>,
    ) -> Self {
        let service = service.into();
        let interval =
            effective_duration(&service, "interval", spec.interval_secs, DEFAULT_INTERVAL);
        let timeout = effective_duration(&service, "timeout", spec.timeout_secs, DEFAULT_TIMEOUT);
        if timeout >= interval {
            tracing::warn!(
                service = %service,
                ?interval,
                ?timeout,
                "Health check timeout should be lower than the interval"
            );
        }

        let tls = tls.unwrap_or_else(default_tls_config);
        let connector = HttpsConnectorBuilder::new()
            .with_tls_config((*tls).clone())
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            service,
            balancer,
            path: normalize_path(&spec.path),
            headers: spec.headers.clone(),
            interval,
            timeout,
            client,
        }
    }

    /// Launch the periodic probe until the generation token is cancelled.
    pub fn spawn(self, token: CancellationToken) {
        tokio::spawn(async move {
            tracing::info!(
                service = %self.service,
                interval = ?self.interval,
                path = %self.path,
                "Health check starting"
            );
            let mut ticker = time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.check_all().await,
                    _ = token.cancelled() => {
                        tracing::debug!(service = %self.service, "Health check stopping");
                        break;
                    }
                }
            }
        });
    }

    async fn check_all(&self) {
        for (name, url) in self.balancer.members() {
            let probe_url = format!(
                "{}{}",
                url.to_string().trim_end_matches('/'),
                self.path
            );
            let mut builder = Request::builder().method("GET").uri(probe_url.as_str());
            for (k, v) in &self.headers {
                builder = builder.header(k, v);
            }
            let request = match builder.body(Body::empty()) {
                Ok(req) => req,
                Err(e) => {
                    tracing::error!(service = %self.service, error = %e, "Failed to build health check request");
                    continue;
                }
            };

            let healthy = match time::timeout(self.timeout, self.client.request(request)).await {
                Ok(Ok(response)) => {
                    let ok = response.status().is_success() || response.status().is_redirection();
                    if !ok {
                        tracing::warn!(
                            service = %self.service,
                            server = %url,
                            status = %response.status(),
                            "Health check failed: non-success status"
                        );
                    }
                    ok
                }
                Ok(Err(e)) => {
                    tracing::warn!(service = %self.service, server = %url, error = %e, "Health check failed: connection error");
                    false
                }
                Err(_) => {
                    tracing::warn!(service = %self.service, server = %url, "Health check failed: timeout");
                    false
                }
            };

            self.balancer.set_member_health(&name, healthy);
        }
    }
}
