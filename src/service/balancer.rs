//! Weighted round-robin balancer handle.
//!
//! # Responsibilities
//! - Smooth weighted rotation over the live member set
//! - Cookie-based session stickiness, bypassing rotation entirely
//! - Per-request empty-member guard (503 before any inner handler runs)
//! - Health-toggle surface for the periodic probes
//!
//! One handle is built per service name per configuration generation and is
//! shared by every router referencing that service; it is also the unit of
//! health-check registration. Members keep their configured weight while
//! unhealthy and rejoin rotation at that same weight.

use std::sync::Mutex;

use axum::http::{header, HeaderValue, StatusCode};
use futures_util::future::BoxFuture;
use url::Url;

use crate::http::handler::{status_response, Handler, HttpRequest, HttpResponse, SharedHandler};
use crate::service::cookie;

/// Sticky-cookie policy resolved at build time.
#[derive(Debug, Clone)]
pub struct StickyConfig {
    pub cookie_name: String,
    pub secure: bool,
    pub http_only: bool,
}

struct Member {
    name: String,
    url: Url,
    token: String,
    weight: u32,
    current: i64,
    healthy: bool,
    handler: SharedHandler,
}

/// The live, shared membership set backing one service.
pub struct Balancer {
    service: String,
    sticky: Option<StickyConfig>,
    members: Mutex<Vec<Member>>,
}

impl Balancer {
    pub fn new(service: impl Into<String>, sticky: Option<StickyConfig>) -> Self {
        Self {
            service: service.into(),
            sticky,
            members: Mutex::new(Vec::new()),
        }
    }

    pub fn add_member(&self, name: impl Into<String>, url: Url, weight: u32, handler: SharedHandler) {
        let url_string = url.to_string();
        self.members
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Member {
                name: name.into(),
                token: cookie::server_token(&url_string),
                url,
                weight,
                current: 0,
                healthy: true,
                handler,
            });
    }

    /// Member names and URLs, for health-check registration.
    pub fn members(&self) -> Vec<(String, Url)> {
        self.members
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|m| (m.name.clone(), m.url.clone()))
            .collect()
    }

    /// Toggle one member's participation. The configured weight is retained
    /// so a recovering member rejoins at full weight.
    pub fn set_member_health(&self, name: &str, healthy: bool) {
        let mut members = self
            .members
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(member) = members.iter_mut().find(|m| m.name == name) {
            if member.healthy != healthy {
                tracing::info!(
                    service = %self.service,
                    server = %member.url,
                    healthy,
                    "Backend health changed"
                );
            }
            member.healthy = healthy;
        }
    }

    /// Smooth weighted round-robin over the healthy members.
    fn pick(&self) -> Option<(String, SharedHandler)> {
        let mut members = self
            .members
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let total: i64 = members
            .iter()
            .filter(|m| m.healthy && m.weight > 0)
            .map(|m| i64::from(m.weight))
            .sum();
        if total == 0 {
            return None;
        }
        for member in members.iter_mut() {
            if member.healthy && member.weight > 0 {
                member.current += i64::from(member.weight);
            }
        }
        let best = members
            .iter_mut()
            .filter(|m| m.healthy && m.weight > 0)
            .max_by_key(|m| m.current)?;
        best.current -= total;
        Some((best.token.clone(), best.handler.clone()))
    }

    /// The handler pinned by a sticky cookie, if the pinned member is still a
    /// healthy participant.
    fn pinned(&self, token: &str) -> Option<SharedHandler> {
        let members = self
            .members
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        members
            .iter()
            .find(|m| m.token == token && m.healthy)
            .map(|m| m.handler.clone())
    }

    fn sticky_token(&self, req: &HttpRequest, name: &str) -> Option<String> {
        req.headers()
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    }

    fn set_cookie_value(&self, sticky: &StickyConfig, token: &str) -> Option<HeaderValue> {
        let mut value = format!("{}={}; Path=/", sticky.cookie_name, token);
        if sticky.http_only {
            value.push_str("; HttpOnly");
        }
        if sticky.secure {
            value.push_str("; Secure");
        }
        HeaderValue::from_str(&value).ok()
    }
}

impl Handler for Balancer {
    fn call(&self, req: HttpRequest) -> BoxFuture<'static, HttpResponse> {
        // Sticky lookup first: a valid pin bypasses weighted selection.
        if let Some(sticky) = &self.sticky {
            if let Some(token) = self.sticky_token(&req, &sticky.cookie_name) {
                if let Some(handler) = self.pinned(&token) {
                    return handler.call(req);
                }
            }
        }

        // Empty-member guard, evaluated on every request: a set that drains
        // to zero at runtime is caught without rebuilding the handler.
        let Some((token, handler)) = self.pick() else {
            tracing::debug!(service = %self.service, "No available backend server");
            return Box::pin(async {
                status_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
            });
        };

        let set_cookie = self
            .sticky
            .as_ref()
            .and_then(|sticky| self.set_cookie_value(sticky, &token));
        Box::pin(async move {
            let mut resp = handler.call(req).await;
            if let Some(value) = set_cookie {
                resp.headers_mut().append(header::SET_COOKIE, value);
            }
            resp
        })
    }
}
