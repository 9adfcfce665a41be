//! Static header injection middleware.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use futures_util::future::BoxFuture;

use crate::http::handler::{Handler, HttpRequest, HttpResponse, SharedHandler};

/// Injects fixed request headers before the inner handler runs and fixed
/// response headers after it returns. An empty value removes the header.
pub struct HeadersMiddleware {
    request: Vec<(HeaderName, Option<HeaderValue>)>,
    response: Vec<(HeaderName, Option<HeaderValue>)>,
    next: SharedHandler,
}

impl HeadersMiddleware {
    pub fn wrap(
        request: &HashMap<String, String>,
        response: &HashMap<String, String>,
        next: SharedHandler,
    ) -> SharedHandler {
        Arc::new(Self {
            request: parse_pairs(request),
            response: parse_pairs(response),
            next,
        })
    }
}

fn parse_pairs(raw: &HashMap<String, String>) -> Vec<(HeaderName, Option<HeaderValue>)> {
    raw.iter()
        .filter_map(|(name, value)| {
            let name: HeaderName = name.parse().ok()?;
            if value.is_empty() {
                Some((name, None))
            } else {
                let value: HeaderValue = value.parse().ok()?;
                Some((name, Some(value)))
            }
        })
        .collect()
}

fn apply(headers: &mut axum::http::HeaderMap, pairs: &[(HeaderName, Option<HeaderValue>)]) {
    for (name, value) in pairs {
        match value {
            Some(v) => {
                headers.insert(name.clone(), v.clone());
            }
            None => {
                headers.remove(name);
            }
        }
    }
}

impl Handler for HeadersMiddleware {
    fn call(&self, mut req: HttpRequest) -> BoxFuture<'static, HttpResponse> {
        apply(req.headers_mut(), &self.request);
        let next = self.next.clone();
        let response_pairs = self.response.clone();
        Box::pin(async move {
            let mut resp = next.call(req).await;
            apply(resp.headers_mut(), &response_pairs);
            resp
        })
    }
}
