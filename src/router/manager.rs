//! Router orchestration for one configuration generation.
//!
//! # Data Flow
//! ```text
//! DynamicConfig snapshot
//!     → RuntimeState (qualified names, per-entity error fields)
//!     → per entry point: filter routers → build middleware chain + service
//!       handler → register (rule, priority) in the dispatcher → sort
//!     → panic-recovery wrapper, outermost, one per entry point
//!     → deferred health-check launch for the whole generation
//! ```
//!
//! # Design Decisions
//! - A router that fails to build is recorded and skipped; its siblings are
//!   unaffected
//! - The service handler is built once per distinct qualified service name
//!   and shared by every router referencing it
//! - User priorities stop below the ceiling reserved for specificity
//!   tie-breaking; meeting it is a hard validation error, not a clamp

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::config::runtime::RuntimeState;
use crate::config::schema::DynamicConfig;
use crate::errors::ConfigError;
use crate::http::handler::{status_response, Handler, HttpRequest, HttpResponse, SharedHandler};
use crate::middleware;
use crate::muxer::Dispatcher;
use crate::provider::qualify;
use crate::router::recovery::Recovery;
use crate::service::ServiceManager;
use crate::transport::TransportManager;

/// Priorities at or above this value are reserved for internal tie-breaking.
pub const PRIORITY_CEILING: i64 = i32::MAX as i64;

/// Terminal per-entry-point handler: dispatch or 404.
struct DispatchHandler {
    entry_point: String,
    dispatcher: Dispatcher,
}

impl Handler for DispatchHandler {
    fn call(&self, req: HttpRequest) -> BoxFuture<'static, HttpResponse> {
        match self.dispatcher.match_request(&req) {
            Some(handler) => handler.call(req),
            None => {
                tracing::debug!(
                    entry_point = %self.entry_point,
                    path = %req.uri().path(),
                    "No matching route"
                );
                Box::pin(async { status_response(StatusCode::NOT_FOUND, "404 page not found") })
            }
        }
    }
}

/// Everything one configuration generation produced.
///
/// Dropping a generation cancels its health checks; the handlers themselves
/// stay valid for requests still running against them.
pub struct Generation {
    pub handlers: HashMap<String, SharedHandler>,
    pub state: Arc<RuntimeState>,
    token: CancellationToken,
}

impl Drop for Generation {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Builds the per-entry-point handler tree from a configuration snapshot.
pub struct RouterManager {
    transports: Arc<TransportManager>,
}

impl RouterManager {
    pub fn new(transports: Arc<TransportManager>) -> Self {
        Self { transports }
    }

    /// Build a complete generation: transports first, then every entry
    /// point's handler, then the deferred health-check launch.
    pub fn build_generation(
        &self,
        config: DynamicConfig,
        provider: &str,
        entry_points: &[String],
    ) -> Generation {
        self.transports.update(config.transports.clone());

        let mut state = RuntimeState::new(config, provider);
        let mut services = ServiceManager::new(self.transports.clone());
        let handlers = self.build_handlers(&mut state, entry_points, false, &mut services);

        let token = CancellationToken::new();
        for check in services.take_health_checks() {
            check.spawn(token.child_token());
        }

        Generation {
            handlers,
            state: Arc::new(state),
            token,
        }
    }

    /// One handler per entry point for the given TLS mode.
    pub fn build_handlers(
        &self,
        state: &mut RuntimeState,
        entry_points: &[String],
        tls: bool,
        services: &mut ServiceManager,
    ) -> HashMap<String, SharedHandler> {
        entry_points
            .iter()
            .map(|ep| {
                let handler = self.build_entry_point(state, ep, tls, services);
                (ep.clone(), handler)
            })
            .collect()
    }

    fn build_entry_point(
        &self,
        state: &mut RuntimeState,
        entry_point: &str,
        tls: bool,
        services: &mut ServiceManager,
    ) -> SharedHandler {
        let mut dispatcher = Dispatcher::new();
        for name in state.routers_for_entry_point(entry_point, tls) {
            if let Err(err) = build_router(state, &name, tls, services, &mut dispatcher) {
                tracing::error!(router = %name, error = %err, "Router failed to build");
                state.record_router_error(&name, &err);
            }
        }
        dispatcher.sort_routes();
        tracing::info!(
            entry_point = %entry_point,
            routes = dispatcher.len(),
            tls,
            "Entry point handler built"
        );

        Recovery::wrap(Arc::new(DispatchHandler {
            entry_point: entry_point.to_string(),
            dispatcher,
        }))
    }
}

fn build_router(
    state: &mut RuntimeState,
    name: &str,
    tls: bool,
    services: &mut ServiceManager,
    dispatcher: &mut Dispatcher,
) -> Result<(), ConfigError> {
    let spec = match state.routers.get(name) {
        Some(info) => info.spec.clone(),
        None => return Ok(()),
    };

    if spec.priority >= PRIORITY_CEILING {
        return Err(ConfigError::PriorityExceeded(spec.priority));
    }

    let provider = RuntimeState::provider_for(name).to_string();

    if tls {
        if let Some(tls_spec) = &spec.tls {
            if !tls_spec.options.is_empty() {
                let options = qualify(&tls_spec.options, &provider);
                if !state.tls_options.contains_key(&options) {
                    return Err(ConfigError::UnknownTlsOptions(options));
                }
                if let Some(info) = state.routers.get_mut(name) {
                    if let Some(t) = info.spec.tls.as_mut() {
                        t.options = options;
                    }
                }
            }
        }
    }

    // Resolved references are written back so the status surface reports
    // qualified names.
    let service_ref = qualify(&spec.service, &provider);
    let middleware_refs: Vec<String> = spec
        .middlewares
        .iter()
        .map(|m| qualify(m, &provider))
        .collect();
    if let Some(info) = state.routers.get_mut(name) {
        info.spec.service = service_ref.clone();
        info.spec.middlewares = middleware_refs.clone();
    }

    let wrappers = middleware::build_chain(state, &middleware_refs, &provider)?;
    let terminal = services.build(&service_ref, state).map_err(|err| {
        state.record_service_error(&service_ref, &err);
        err
    })?;
    let handler = middleware::apply(wrappers, terminal);

    let priority = spec.priority.clamp(i32::MIN as i64, PRIORITY_CEILING - 1) as i32;
    dispatcher
        .add_route(&spec.rule, priority, handler)
        .map_err(|e| ConfigError::InvalidRule {
            rule: e.rule,
            reason: e.reason,
        })?;

    tracing::debug!(router = %name, rule = %spec.rule, service = %service_ref, "Router built");
    Ok(())
}
