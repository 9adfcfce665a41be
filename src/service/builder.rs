//! Service handler construction.
//!
//! # Responsibilities
//! - Turn one service declaration into a request-forwarding handler
//! - Build exactly one balancer handle per service name per generation,
//!   shared by every router referencing that service
//! - Register health checks for later, deferred launch

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::config::runtime::RuntimeState;
use crate::errors::ConfigError;
use crate::http::handler::SharedHandler;
use crate::service::balancer::{Balancer, StickyConfig};
use crate::service::cookie;
use crate::service::healthcheck::HealthCheck;
use crate::service::pipelining::Pipelining;
use crate::service::proxy::ServerHandler;
use crate::transport::TransportManager;

/// Per-generation service builder and handler cache.
pub struct ServiceManager {
    transports: Arc<TransportManager>,
    handlers: HashMap<String, SharedHandler>,
    balancers: HashMap<String, Arc<Balancer>>,
    health_checks: Vec<HealthCheck>,
}

impl ServiceManager {
    pub fn new(transports: Arc<TransportManager>) -> Self {
        Self {
            transports,
            handlers: HashMap::new(),
            balancers: HashMap::new(),
            health_checks: Vec::new(),
        }
    }

    /// Build (or reuse) the handler for a qualified service name.
    pub fn build(
        &mut self,
        qualified: &str,
        state: &RuntimeState,
    ) -> Result<SharedHandler, ConfigError> {
        if let Some(handler) = self.handlers.get(qualified) {
            return Ok(handler.clone());
        }

        let spec = state
            .services
            .get(qualified)
            .ok_or_else(|| ConfigError::UnknownService(qualified.to_string()))?
            .spec
            .clone();
        let lb = spec
            .load_balancer
            .ok_or_else(|| ConfigError::NoLoadBalancer(qualified.to_string()))?;

        let transport = self
            .transports
            .get(&lb.servers_transport)
            .map_err(|e| ConfigError::Transport(e.to_string()))?;

        let sticky = lb.sticky.as_ref().map(|s| StickyConfig {
            cookie_name: cookie::cookie_name(&s.cookie.name, qualified),
            secure: s.cookie.secure,
            http_only: s.cookie.http_only,
        });

        let balancer = Arc::new(Balancer::new(qualified, sticky));
        for server in &lb.servers {
            let url = Url::parse(&server.url).map_err(|e| ConfigError::InvalidServerUrl {
                service: qualified.to_string(),
                url: server.url.clone(),
                reason: e.to_string(),
            })?;
            let proxy = ServerHandler::new(qualified, &url, transport.clone(), lb.pass_host_header)?;
            // Pipelining sits between the balancer and the proxy so only
            // mutating requests become abort-eligible.
            let handler = Pipelining::wrap(Arc::new(proxy));
            balancer.add_member(server.url.clone(), url, server.weight, handler);
        }

        if let Some(hc) = &lb.health_check {
            let tls = self
                .transports
                .tls_config(&lb.servers_transport)
                .unwrap_or(None);
            self.health_checks
                .push(HealthCheck::new(qualified, hc, balancer.clone(), tls));
        }

        tracing::debug!(
            service = %qualified,
            servers = lb.servers.len(),
            "Service handler built"
        );

        let handler: SharedHandler = balancer.clone();
        self.balancers.insert(qualified.to_string(), balancer);
        self.handlers.insert(qualified.to_string(), handler.clone());
        Ok(handler)
    }

    /// The balancer handle for an already-built service.
    pub fn balancer(&self, qualified: &str) -> Option<Arc<Balancer>> {
        self.balancers.get(qualified).cloned()
    }

    /// Health checks collected during the build, handed to the orchestrator
    /// once every service of the generation exists.
    pub fn take_health_checks(&mut self) -> Vec<HealthCheck> {
        std::mem::take(&mut self.health_checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{
        DynamicConfig, HealthCheckSpec, LoadBalancerSpec, ServerSpec, ServiceSpec,
    };
    use crate::transport::TransportRegistry;

    fn manager() -> ServiceManager {
        let transports = Arc::new(TransportManager::new(TransportRegistry::new()));
        transports.update(HashMap::new());
        ServiceManager::new(transports)
    }

    fn state_with(name: &str, spec: ServiceSpec) -> RuntimeState {
        let mut config = DynamicConfig::default();
        config.services.insert(name.to_string(), spec);
        RuntimeState::new(config, "file")
    }

    fn lb_service(urls: &[&str]) -> ServiceSpec {
        ServiceSpec {
            load_balancer: Some(LoadBalancerSpec {
                servers: urls
                    .iter()
                    .map(|u| ServerSpec {
                        url: u.to_string(),
                        weight: 1,
                    })
                    .collect(),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn missing_load_balancer_is_a_config_error() {
        let mut m = manager();
        let state = state_with("app", ServiceSpec::default());
        let err = m.build("app@file", &state).map(|_| ()).unwrap_err();
        assert!(matches!(err, ConfigError::NoLoadBalancer(_)));
    }

    #[tokio::test]
    async fn unknown_service_is_a_config_error() {
        let mut m = manager();
        let state = RuntimeState::default();
        let err = m.build("ghost@file", &state).map(|_| ()).unwrap_err();
        assert_eq!(err, ConfigError::UnknownService("ghost@file".into()));
    }

    #[tokio::test]
    async fn invalid_server_urls_are_config_errors() {
        let mut m = manager();
        let state = state_with("app", lb_service(&["not a url"]));
        let err = m.build("app@file", &state).map(|_| ()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidServerUrl { .. }));
    }

    #[tokio::test]
    async fn handlers_are_cached_per_service_name() {
        let mut m = manager();
        let state = state_with("app", lb_service(&["http://127.0.0.1:3000"]));
        let a = m.build("app@file", &state).unwrap();
        let b = m.build("app@file", &state).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(m.balancer("app@file").is_some());
    }

    #[tokio::test]
    async fn health_checks_are_collected_not_launched() {
        let mut m = manager();
        let mut spec = lb_service(&["http://127.0.0.1:3000"]);
        if let Some(lb) = spec.load_balancer.as_mut() {
            lb.health_check = Some(HealthCheckSpec {
                path: "/health".into(),
                ..Default::default()
            });
        }
        let state = state_with("app", spec);
        m.build("app@file", &state).unwrap();
        assert_eq!(m.take_health_checks().len(), 1);
        assert!(m.take_health_checks().is_empty());
    }
}
