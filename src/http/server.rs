//! Entry-point servers.
//!
//! # Responsibilities
//! - Bind one listener per configured entry point
//! - Look up the current generation's handler on every request
//! - Keep serving the previous generation while a reload is being built
//!
//! The handler for an entry point is swapped atomically (`arc-swap`) when a
//! new configuration generation finishes building, so in-flight requests
//! always run against a complete handler tree.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::http::handler::{status_response, HttpRequest, SharedHandler};

/// The swappable per-entry-point handler table for the active generation.
pub type HandlerTable = Arc<ArcSwap<HashMap<String, SharedHandler>>>;

/// Create an empty handler table.
pub fn new_handler_table() -> HandlerTable {
    Arc::new(ArcSwap::from_pointee(HashMap::new()))
}

/// One listening entry point.
pub struct EntryPointServer {
    name: String,
    handlers: HandlerTable,
}

impl EntryPointServer {
    pub fn new(name: impl Into<String>, handlers: HandlerTable) -> Self {
        Self {
            name: name.into(),
            handlers,
        }
    }

    /// Serve the entry point until the shutdown future resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(entry_point = %self.name, address = %addr, "Entry point listening");

        let name = Arc::new(self.name);
        let handlers = self.handlers;
        let app = Router::new()
            .fallback(any(move |mut req: HttpRequest| {
                let name = name.clone();
                let handlers = handlers.clone();
                async move {
                    let handler = handlers.load().get(name.as_str()).cloned();
                    let Some(handler) = handler else {
                        return status_response(
                            StatusCode::SERVICE_UNAVAILABLE,
                            "no configuration loaded",
                        )
                        .into_response();
                    };
                    // A dropped request future means the client went away;
                    // the guard then cancels the token seen downstream.
                    let token = CancellationToken::new();
                    req.extensions_mut().insert(token.clone());
                    let guard = token.drop_guard();
                    let resp = handler.call(req).await;
                    guard.disarm();
                    resp.into_response()
                }
            }))
            .layer(TraceLayer::new_for_http());

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
