//! Path prefix middlewares.

use std::sync::Arc;

use axum::http::uri::{PathAndQuery, Uri};
use futures_util::future::BoxFuture;

use crate::http::handler::{Handler, HttpRequest, HttpResponse, SharedHandler};

/// Replace the request path, preserving the query string.
fn with_path(req: &mut HttpRequest, path: &str) {
    let mut parts = req.uri().clone().into_parts();
    let pq = match req.uri().query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    if let Ok(pq) = PathAndQuery::try_from(pq) {
        parts.path_and_query = Some(pq);
        if let Ok(uri) = Uri::from_parts(parts) {
            *req.uri_mut() = uri;
        }
    }
}

/// Prepends a fixed prefix to the request path.
pub struct AddPrefix {
    prefix: String,
    next: SharedHandler,
}

impl AddPrefix {
    pub fn wrap(prefix: &str, next: SharedHandler) -> SharedHandler {
        Arc::new(Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            next,
        })
    }
}

impl Handler for AddPrefix {
    fn call(&self, mut req: HttpRequest) -> BoxFuture<'static, HttpResponse> {
        let path = format!("{}{}", self.prefix, req.uri().path());
        with_path(&mut req, &path);
        self.next.call(req)
    }
}

/// Removes the first matching prefix from the request path.
pub struct StripPrefix {
    prefixes: Vec<String>,
    next: SharedHandler,
}

impl StripPrefix {
    pub fn wrap(prefixes: &[String], next: SharedHandler) -> SharedHandler {
        Arc::new(Self {
            prefixes: prefixes.to_vec(),
            next,
        })
    }
}

impl Handler for StripPrefix {
    fn call(&self, mut req: HttpRequest) -> BoxFuture<'static, HttpResponse> {
        let path = req.uri().path().to_string();
        for prefix in &self.prefixes {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                let stripped = if rest.starts_with('/') {
                    rest.to_string()
                } else {
                    format!("/{rest}")
                };
                with_path(&mut req, &stripped);
                break;
            }
        }
        self.next.call(req)
    }
}
