//! Request-handler abstraction.
//!
//! # Responsibilities
//! - Define the `Handler` trait every router/middleware/service layer implements
//! - Provide closure adapters so small handlers stay terse
//! - Provide canned status responses

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use futures_util::future::BoxFuture;

pub type HttpRequest = Request<Body>;
pub type HttpResponse = Response<Body>;

/// An asynchronous HTTP request handler.
///
/// Handlers are composed into chains: each middleware owns the next handler
/// and decides whether to forward, short-circuit, or rewrite.
pub trait Handler: Send + Sync {
    fn call(&self, req: HttpRequest) -> BoxFuture<'static, HttpResponse>;
}

/// Shared, cheaply-clonable handler reference.
pub type SharedHandler = Arc<dyn Handler>;

/// Adapter so `Fn(HttpRequest) -> impl Future<Output = HttpResponse>` closures
/// are handlers without boilerplate.
pub struct HandlerFn<F>(pub F);

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(HttpRequest) -> Fut + Send + Sync,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    fn call(&self, req: HttpRequest) -> BoxFuture<'static, HttpResponse> {
        Box::pin((self.0)(req))
    }
}

/// Wrap a closure into a [`SharedHandler`].
pub fn handler_fn<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Build a plain-text response with the given status.
pub fn status_response(status: StatusCode, message: &str) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(message.to_string()))
        .unwrap_or_else(|_| {
            let mut resp = Response::new(Body::empty());
            *resp.status_mut() = status;
            resp
        })
}

/// The non-standard status returned when the client goes away mid-request.
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

/// Response for a cancelled inbound request.
pub fn client_closed_response() -> HttpResponse {
    let mut resp = Response::new(Body::from("Client Closed Request"));
    *resp.status_mut() = StatusCode::from_u16(STATUS_CLIENT_CLOSED_REQUEST)
        .unwrap_or(StatusCode::BAD_GATEWAY);
    resp
}
