//! Per-route failure isolation.
//!
//! A panic anywhere inside one route's handler stack must not take down the
//! accept loop or other routes, so every registered handler is wrapped here
//! and panics collapse into a 500 response.

use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::http::handler::{status_response, Handler, HttpRequest, HttpResponse, SharedHandler};

pub struct Recovery {
    next: SharedHandler,
}

impl Recovery {
    pub fn wrap(next: SharedHandler) -> SharedHandler {
        Arc::new(Self { next })
    }
}

impl Handler for Recovery {
    fn call(&self, req: HttpRequest) -> BoxFuture<'static, HttpResponse> {
        let fut = std::panic::AssertUnwindSafe(self.next.call(req)).catch_unwind();
        Box::pin(async move {
            match fut.await {
                Ok(resp) => resp,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(panic = %message, "Handler panicked, recovering");
                    status_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                }
            }
        })
    }
}
