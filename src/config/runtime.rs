//! Shared runtime state for one configuration generation.
//!
//! # Responsibilities
//! - Hold every router/middleware/service spec under its qualified name
//! - Accumulate per-entity build errors without aborting siblings
//! - Back the operator-facing status surface (read-only after build)
//!
//! The state is an arena addressed by qualified-name strings: builders take
//! `&mut RuntimeState`, record resolved references in place (so resolution is
//! idempotent and observable) and merge errors back through the orchestrator.
//! It is replaced wholesale per generation, never patched entity by entity.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::schema::{DynamicConfig, MiddlewareSpec, RouterSpec, ServiceSpec, TlsOptionsSpec};
use crate::provider::{provider_of, qualify};

/// A spec plus its accumulated build errors.
#[derive(Debug, Clone, Serialize)]
pub struct EntityInfo<T> {
    pub spec: T,
    /// Non-empty means the entity failed to build and is unreachable.
    pub errors: Vec<String>,
}

impl<T> EntityInfo<T> {
    fn new(spec: T) -> Self {
        Self {
            spec,
            errors: Vec::new(),
        }
    }

    pub fn add_error(&mut self, err: impl std::fmt::Display) {
        self.errors.push(err.to_string());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub type RouterInfo = EntityInfo<RouterSpec>;
pub type MiddlewareInfo = EntityInfo<MiddlewareSpec>;
pub type ServiceInfo = EntityInfo<ServiceSpec>;

/// The aggregate of all entities of one configuration generation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeState {
    pub routers: HashMap<String, RouterInfo>,
    pub middlewares: HashMap<String, MiddlewareInfo>,
    pub services: HashMap<String, ServiceInfo>,
    pub tls_options: HashMap<String, TlsOptionsSpec>,
}

impl RuntimeState {
    /// Ingest a configuration snapshot, qualifying every entity name with the
    /// given provider when it carries no suffix of its own.
    pub fn new(config: DynamicConfig, provider: &str) -> Self {
        let mut state = Self::default();
        for (name, spec) in config.routers {
            state
                .routers
                .insert(qualify(&name, provider), EntityInfo::new(spec));
        }
        for (name, spec) in config.middlewares {
            state
                .middlewares
                .insert(qualify(&name, provider), EntityInfo::new(spec));
        }
        for (name, spec) in config.services {
            state
                .services
                .insert(qualify(&name, provider), EntityInfo::new(spec));
        }
        for (name, spec) in config.tls_options {
            state.tls_options.insert(qualify(&name, provider), spec);
        }
        state
    }

    /// The provider a qualified entity name belongs to.
    pub fn provider_for(name: &str) -> &str {
        provider_of(name).unwrap_or("")
    }

    /// Routers whose entry-point membership intersects `entry_point` and
    /// whose TLS-option presence matches `tls`.
    ///
    /// An empty membership list attaches the router to every entry point.
    pub fn routers_for_entry_point(&self, entry_point: &str, tls: bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .routers
            .iter()
            .filter(|(_, info)| info.spec.tls.is_some() == tls)
            .filter(|(_, info)| {
                info.spec.entry_points.is_empty()
                    || info.spec.entry_points.iter().any(|ep| ep == entry_point)
            })
            .map(|(name, _)| name.clone())
            .collect();
        // Deterministic build order keeps logs and error attribution stable.
        names.sort();
        names
    }

    pub fn record_router_error(&mut self, name: &str, err: impl std::fmt::Display) {
        if let Some(info) = self.routers.get_mut(name) {
            info.add_error(err);
        }
    }

    pub fn record_service_error(&mut self, name: &str, err: impl std::fmt::Display) {
        if let Some(info) = self.services.get_mut(name) {
            info.add_error(err);
        }
    }

    pub fn record_middleware_error(&mut self, name: &str, err: impl std::fmt::Display) {
        if let Some(info) = self.middlewares.get_mut(name) {
            info.add_error(err);
        }
    }
}
