//! Pluggable connectivity registry.
//!
//! Custom dialers (outbound proxies) and SPIFFE identity sources are
//! registered on this object before the transport manager is constructed.
//! There is no process-global registry.

use std::sync::Arc;

use rustls::ClientConfig;

use crate::config::schema::{SpiffeSpec, TransportSpec};
use crate::errors::ConfigError;
use crate::transport::RoundTripper;

/// Builds complete round trippers for transport specs it claims, e.g. specs
/// carrying a proxy URL or a vendor-specific dial scheme.
pub trait ConnectorProvider: Send + Sync {
    /// Whether this provider wants to build the given spec.
    fn handles(&self, spec: &TransportSpec) -> bool;

    /// Build the base (pre-affinity) round tripper for the spec.
    fn build(
        &self,
        name: &str,
        spec: &TransportSpec,
    ) -> Result<Arc<dyn RoundTripper>, ConfigError>;
}

/// Supplies SPIFFE workload identities as rustls client configurations.
pub trait SpiffeSource: Send + Sync {
    fn client_config(&self, spec: &SpiffeSpec) -> Result<ClientConfig, ConfigError>;
}

/// Registry handed to [`crate::transport::TransportManager::new`].
#[derive(Default, Clone)]
pub struct TransportRegistry {
    connectors: Vec<Arc<dyn ConnectorProvider>>,
    spiffe: Option<Arc<dyn SpiffeSource>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_connector(&mut self, provider: Arc<dyn ConnectorProvider>) {
        self.connectors.push(provider);
    }

    pub fn register_spiffe_source(&mut self, source: Arc<dyn SpiffeSource>) {
        self.spiffe = Some(source);
    }

    /// First registered provider claiming the spec, if any.
    pub fn connector_for(&self, spec: &TransportSpec) -> Option<&Arc<dyn ConnectorProvider>> {
        self.connectors.iter().find(|p| p.handles(spec))
    }

    pub fn spiffe_source(&self) -> Option<&Arc<dyn SpiffeSource>> {
        self.spiffe.as_ref()
    }
}
