//! Rule-matching dispatcher.
//!
//! # Responsibilities
//! - Parse rule expressions into match predicates
//! - Hold (rule, priority, handler) routes for one entry point
//! - Order candidates by descending priority, rule length breaking ties
//! - Match incoming requests to the winning handler
//!
//! # Design Decisions
//! - Host matching is case-insensitive and port-agnostic (per HTTP spec)
//! - Path matching is case-sensitive
//! - No regex in the hot path, prefix/exact matching only
//! - Routes are frozen after `sort_routes`; matching is read-only

use axum::http::header;
use thiserror::Error;

use crate::http::handler::{HttpRequest, SharedHandler};

/// Error for an unparseable rule expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid rule {rule:?}: {reason}")]
pub struct RuleError {
    pub rule: String,
    pub reason: String,
}

impl RuleError {
    fn new(rule: &str, reason: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }
}

/// One parsed match term.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    /// Exact host match, lowercased, request port stripped.
    Host(String),
    /// Exact path match.
    Path(String),
    /// Path prefix match.
    PathPrefix(String),
}

impl Matcher {
    fn matches(&self, req: &HttpRequest) -> bool {
        match self {
            Matcher::Host(expected) => {
                !expected.is_empty()
                    && request_host(req)
                        .map(|h| h.eq_ignore_ascii_case(expected))
                        .unwrap_or(false)
            }
            Matcher::Path(expected) => req.uri().path() == expected,
            Matcher::PathPrefix(prefix) => req.uri().path().starts_with(prefix.as_str()),
        }
    }
}

/// The request's effective host, without the port.
fn request_host(req: &HttpRequest) -> Option<&str> {
    let raw = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().host())?;
    Some(raw.rsplit_once(':').map_or(raw, |(host, port)| {
        if port.chars().all(|c| c.is_ascii_digit()) {
            host
        } else {
            raw
        }
    }))
}

/// Parse a rule expression: backtick-quoted terms joined by `&&`.
fn parse_rule(rule: &str) -> Result<Vec<Matcher>, RuleError> {
    let mut matchers = Vec::new();
    for term in rule.split("&&") {
        let term = term.trim();
        if term.is_empty() {
            return Err(RuleError::new(rule, "empty term"));
        }
        let (name, rest) = term
            .split_once('(')
            .ok_or_else(|| RuleError::new(rule, format!("missing argument in {term:?}")))?;
        let arg = rest
            .strip_suffix(')')
            .and_then(|a| a.trim().strip_prefix('`'))
            .and_then(|a| a.strip_suffix('`'))
            .ok_or_else(|| {
                RuleError::new(rule, format!("expected a backtick-quoted argument in {term:?}"))
            })?;
        let matcher = match name.trim() {
            "Host" => Matcher::Host(arg.to_ascii_lowercase()),
            "Path" => Matcher::Path(arg.to_string()),
            "PathPrefix" => Matcher::PathPrefix(arg.to_string()),
            other => return Err(RuleError::new(rule, format!("unknown matcher {other:?}"))),
        };
        matchers.push(matcher);
    }
    if matchers.is_empty() {
        return Err(RuleError::new(rule, "empty rule"));
    }
    Ok(matchers)
}

struct Route {
    rule: String,
    priority: i32,
    matchers: Vec<Matcher>,
    handler: SharedHandler,
}

impl Route {
    fn matches(&self, req: &HttpRequest) -> bool {
        self.matchers.iter().all(|m| m.matches(req))
    }
}

/// Priority-ordered rule dispatcher for one entry point.
#[derive(Default)]
pub struct Dispatcher {
    routes: Vec<Route>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. A zero priority is replaced by the rule's length so
    /// that longer (more specific) rules win by default.
    pub fn add_route(
        &mut self,
        rule: &str,
        priority: i32,
        handler: SharedHandler,
    ) -> Result<(), RuleError> {
        let matchers = parse_rule(rule)?;
        let priority = if priority == 0 {
            rule.len().min(i32::MAX as usize) as i32
        } else {
            priority
        };
        self.routes.push(Route {
            rule: rule.to_string(),
            priority,
            matchers,
            handler,
        });
        Ok(())
    }

    /// Freeze the dispatch order: descending priority, longer rule first on
    /// ties. Stable within one configuration generation.
    pub fn sort_routes(&mut self) {
        self.routes
            .sort_by(|a, b| match b.priority.cmp(&a.priority) {
                std::cmp::Ordering::Equal => b.rule.len().cmp(&a.rule.len()),
                other => other,
            });
    }

    /// First matching handler in dispatch order, if any.
    pub fn match_request(&self, req: &HttpRequest) -> Option<SharedHandler> {
        self.routes
            .iter()
            .find(|route| route.matches(req))
            .map(|route| route.handler.clone())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::{handler_fn, status_response};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    fn handler(status: StatusCode) -> SharedHandler {
        handler_fn(move |_req| async move { status_response(status, "") })
    }

    fn request(host: &str, path: &str) -> HttpRequest {
        Request::builder()
            .uri(format!("http://placeholder{path}"))
            .header("Host", host)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn host_matching_is_case_insensitive_and_port_agnostic() {
        let mut mux = Dispatcher::new();
        mux.add_route("Host(`foo.bar`)", 0, handler(StatusCode::OK))
            .unwrap();
        mux.sort_routes();

        assert!(mux.match_request(&request("FOO.BAR", "/")).is_some());
        assert!(mux.match_request(&request("foo.bar:8080", "/")).is_some());
        assert!(mux.match_request(&request("other.host", "/")).is_none());
    }

    #[test]
    fn empty_host_rule_never_matches() {
        let mut mux = Dispatcher::new();
        mux.add_route("Host(``)", 0, handler(StatusCode::OK)).unwrap();
        mux.sort_routes();
        assert!(mux.match_request(&request("foo.bar", "/")).is_none());
        // A request that itself carries an empty Host header still must not match.
        assert!(mux.match_request(&request("", "/")).is_none());
    }

    #[test]
    fn and_semantics_require_all_terms() {
        let mut mux = Dispatcher::new();
        mux.add_route(
            "Host(`foo.bar`) && PathPrefix(`/api`)",
            0,
            handler(StatusCode::OK),
        )
        .unwrap();
        mux.sort_routes();

        assert!(mux.match_request(&request("foo.bar", "/api/v1")).is_some());
        assert!(mux.match_request(&request("foo.bar", "/other")).is_none());
    }

    #[tokio::test]
    async fn higher_priority_wins_regardless_of_insertion_order() {
        let mut mux = Dispatcher::new();
        mux.add_route("PathPrefix(`/`)", 1, handler(StatusCode::IM_A_TEAPOT))
            .unwrap();
        mux.add_route("PathPrefix(`/`)", 100, handler(StatusCode::OK))
            .unwrap();
        mux.sort_routes();

        let h = mux.match_request(&request("any", "/x")).unwrap();
        let resp = h.call(request("any", "/x")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn zero_priority_defaults_to_rule_length() {
        let mut mux = Dispatcher::new();
        mux.add_route("PathPrefix(`/`)", 0, handler(StatusCode::IM_A_TEAPOT))
            .unwrap();
        mux.add_route("PathPrefix(`/api/v1/items`)", 0, handler(StatusCode::OK))
            .unwrap();
        mux.sort_routes();

        let h = mux.match_request(&request("any", "/api/v1/items")).unwrap();
        let resp = h.call(request("any", "/api/v1/items")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn invalid_rules_are_rejected() {
        let mut mux = Dispatcher::new();
        assert!(mux.add_route("", 0, handler(StatusCode::OK)).is_err());
        assert!(mux
            .add_route("Bogus(`x`)", 0, handler(StatusCode::OK))
            .is_err());
        assert!(mux
            .add_route("Host(foo.bar)", 0, handler(StatusCode::OK))
            .is_err());
    }
}
