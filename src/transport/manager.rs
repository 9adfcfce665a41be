//! Named transport cache.
//!
//! # Responsibilities
//! - Build and cache one transport per named spec
//! - Keep connection pools alive across reloads when a spec is unchanged
//! - Downgrade build failures to the default transport, never to a request
//!   failure
//!
//! Updates take the write side of the lock; request-time lookups share the
//! read side and never block each other.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rustls::ClientConfig;

use crate::config::schema::TransportSpec;
use crate::transport::affinity::{AffinityTransport, DedicatedFactory};
use crate::transport::builder::build_round_tripper;
use crate::transport::registry::TransportRegistry;
use crate::transport::{builder, RoundTripper, TransportError, DEFAULT_TRANSPORT};

struct Entry {
    spec: TransportSpec,
    transport: Arc<AffinityTransport>,
    tls: Option<Arc<ClientConfig>>,
}

/// Cache of built transports keyed by configuration name.
pub struct TransportManager {
    registry: TransportRegistry,
    transports: RwLock<HashMap<String, Arc<Entry>>>,
}

impl TransportManager {
    pub fn new(registry: TransportRegistry) -> Self {
        Self {
            registry,
            transports: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the active configuration set.
    ///
    /// Transports whose spec is unchanged are kept as-is so their connection
    /// pools survive; changed and new names are rebuilt; absent names are
    /// dropped. A failed build logs and substitutes the default transport.
    pub fn update(&self, mut configs: HashMap<String, TransportSpec>) {
        configs
            .entry(DEFAULT_TRANSPORT.to_string())
            .or_insert_with(TransportSpec::default);

        let mut transports = self
            .transports
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // The default is built first so failed builds have a fallback.
        let default_entry = match transports.get(DEFAULT_TRANSPORT) {
            Some(existing) if existing.spec == configs[DEFAULT_TRANSPORT] => existing.clone(),
            _ => {
                let spec = configs[DEFAULT_TRANSPORT].clone();
                match self.build_entry(DEFAULT_TRANSPORT, spec.clone()) {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::error!(error = %e, "Default transport failed to build");
                        Arc::new(Entry {
                            transport: fallback_transport(),
                            tls: None,
                            spec,
                        })
                    }
                }
            }
        };

        let mut next: HashMap<String, Arc<Entry>> = HashMap::with_capacity(configs.len());
        for (name, spec) in configs {
            if name == DEFAULT_TRANSPORT {
                continue;
            }
            let entry = match transports.get(&name) {
                Some(existing) if existing.spec == spec => {
                    tracing::debug!(transport = %name, "Transport unchanged, keeping pools");
                    existing.clone()
                }
                _ => match self.build_entry(&name, spec.clone()) {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::error!(transport = %name, error = %e, "Transport failed to build, using default");
                        Arc::new(Entry {
                            transport: default_entry.transport.clone(),
                            tls: default_entry.tls.clone(),
                            spec,
                        })
                    }
                },
            };
            next.insert(name, entry);
        }
        next.insert(DEFAULT_TRANSPORT.to_string(), default_entry);
        *transports = next;
    }

    fn build_entry(
        &self,
        name: &str,
        spec: TransportSpec,
    ) -> Result<Arc<Entry>, crate::errors::ConfigError> {
        let shared = build_round_tripper(name, &spec, &self.registry, true)?;
        let tls = builder::build_tls_config(name, &spec, &self.registry)?;

        let factory_spec = spec.clone();
        let factory_registry = self.registry.clone();
        let factory_name = name.to_string();
        let factory_fallback = shared.clone();
        let dedicated: DedicatedFactory = Arc::new(move || {
            match build_round_tripper(&factory_name, &factory_spec, &factory_registry, false) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(transport = %factory_name, error = %e, "Dedicated transport build failed, reusing shared pool");
                    factory_fallback.clone()
                }
            }
        });

        Ok(Arc::new(Entry {
            transport: Arc::new(AffinityTransport::new(shared, dedicated)),
            tls,
            spec,
        }))
    }

    /// Look up a transport; an empty name resolves to the default.
    pub fn get(&self, name: &str) -> Result<Arc<AffinityTransport>, TransportError> {
        let name = effective_name(name);
        self.transports
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .map(|entry| entry.transport.clone())
            .ok_or_else(|| TransportError::NotFound(name.to_string()))
    }

    /// TLS material alone, for non-HTTP callers such as health checks.
    pub fn tls_config(&self, name: &str) -> Result<Option<Arc<ClientConfig>>, TransportError> {
        let name = effective_name(name);
        self.transports
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .map(|entry| entry.tls.clone())
            .ok_or_else(|| TransportError::NotFound(name.to_string()))
    }
}

fn effective_name(name: &str) -> &str {
    if name.is_empty() {
        DEFAULT_TRANSPORT
    } else {
        name
    }
}

/// Last-resort transport when even the default spec cannot be built.
fn fallback_transport() -> Arc<AffinityTransport> {
    struct Unavailable;
    impl RoundTripper for Unavailable {
        fn round_trip(
            &self,
            _req: crate::http::handler::HttpRequest,
        ) -> futures_util::future::BoxFuture<
            'static,
            Result<crate::http::handler::HttpResponse, TransportError>,
        > {
            Box::pin(async { Err(TransportError::NotFound(DEFAULT_TRANSPORT.to_string())) })
        }
    }
    let shared: Arc<dyn RoundTripper> = Arc::new(Unavailable);
    let fallback = shared.clone();
    Arc::new(AffinityTransport::new(
        shared,
        Arc::new(move || fallback.clone()),
    ))
}

#[cfg(test)]
pub mod tests_support {
    use super::*;

    /// A transport whose round trips always fail; for tests that never
    /// actually dial.
    pub fn noop_transport() -> Arc<AffinityTransport> {
        fallback_transport()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::SpiffeSpec;

    fn manager() -> TransportManager {
        TransportManager::new(TransportRegistry::new())
    }

    fn named(name: &str, spec: TransportSpec) -> HashMap<String, TransportSpec> {
        HashMap::from([(name.to_string(), spec)])
    }

    #[tokio::test]
    async fn empty_name_resolves_to_the_default_transport() {
        let m = manager();
        m.update(HashMap::new());
        let a = m.get("").unwrap();
        let b = m.get(DEFAULT_TRANSPORT).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn unknown_names_are_not_found() {
        let m = manager();
        m.update(HashMap::new());
        assert!(matches!(m.get("ghost"), Err(TransportError::NotFound(_))));
        assert!(matches!(
            m.tls_config("ghost"),
            Err(TransportError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unchanged_specs_keep_the_same_transport_instance() {
        let m = manager();
        let mut spec = TransportSpec::default();
        spec.insecure_skip_verify = true;

        m.update(named("t", spec.clone()));
        let first = m.get("t").unwrap();

        m.update(named("t", spec.clone()));
        let second = m.get("t").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        spec.server_name = Some("other.example".into());
        m.update(named("t", spec));
        let third = m.get("t").unwrap();
        assert!(!Arc::ptr_eq(&second, &third));
    }

    #[tokio::test]
    async fn removed_names_disappear() {
        let m = manager();
        m.update(named("t", TransportSpec::default()));
        assert!(m.get("t").is_ok());
        m.update(HashMap::new());
        assert!(m.get("t").is_err());
    }

    #[tokio::test]
    async fn broken_specs_fall_back_to_the_default_transport() {
        let m = manager();
        let mut spec = TransportSpec::default();
        // SPIFFE without a registered source cannot build.
        spec.spiffe = Some(SpiffeSpec::default());
        m.update(named("broken", spec));

        let broken = m.get("broken").unwrap();
        let default = m.get("").unwrap();
        assert!(Arc::ptr_eq(&broken, &default));
    }

    #[tokio::test]
    async fn tls_config_mirrors_the_spec() {
        let m = manager();
        let mut spec = TransportSpec::default();
        spec.insecure_skip_verify = true;
        m.update(named("secure", spec));

        assert!(m.tls_config("secure").unwrap().is_some());
        assert!(m.tls_config("").unwrap().is_none());
    }
}
