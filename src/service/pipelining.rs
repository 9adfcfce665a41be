//! Pipelining guard in front of the forwarding proxy.
//!
//! Interim 1xx responses are absorbed by the HTTP client and never reach
//! non-HTTP/1.1-aware callers, while hyper still relays them on the wire.
//! What this layer adds is the close-notification capability: only mutating
//! methods can have side effects worth aborting, so only they are marked
//! abort-eligible — the proxy cancels the upstream call on client disconnect
//! solely for marked requests.

use std::sync::Arc;

use axum::http::Method;
use futures_util::future::BoxFuture;

use crate::http::handler::{Handler, HttpRequest, HttpResponse, SharedHandler};

/// Extension marker: the upstream call may be aborted on client disconnect.
#[derive(Debug, Clone, Copy)]
pub struct AbortEligible;

/// Safe methods never get the close-notification capability.
fn is_mutating(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

pub struct Pipelining {
    next: SharedHandler,
}

impl Pipelining {
    pub fn wrap(next: SharedHandler) -> SharedHandler {
        Arc::new(Self { next })
    }
}

impl Handler for Pipelining {
    fn call(&self, mut req: HttpRequest) -> BoxFuture<'static, HttpResponse> {
        if is_mutating(req.method()) {
            req.extensions_mut().insert(AbortEligible);
        }
        self.next.call(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::{handler_fn, status_response};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Mutex;

    async fn marker_for(method: Method) -> bool {
        let seen = Arc::new(Mutex::new(false));
        let inner = seen.clone();
        let next = handler_fn(move |req: HttpRequest| {
            let inner = inner.clone();
            async move {
                *inner.lock().unwrap() = req.extensions().get::<AbortEligible>().is_some();
                status_response(StatusCode::OK, "")
            }
        });
        Pipelining::wrap(next)
            .call(
                Request::builder()
                    .method(method)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        let result = *seen.lock().unwrap();
        result
    }

    #[tokio::test]
    async fn mutating_methods_are_abort_eligible() {
        assert!(marker_for(Method::POST).await);
        assert!(marker_for(Method::DELETE).await);
        assert!(marker_for(Method::PUT).await);
    }

    #[tokio::test]
    async fn safe_methods_are_not() {
        assert!(!marker_for(Method::GET).await);
        assert!(!marker_for(Method::HEAD).await);
    }
}
