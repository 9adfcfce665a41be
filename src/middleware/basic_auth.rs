//! HTTP basic authentication middleware.

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use base64::Engine;
use futures_util::future::BoxFuture;

use crate::errors::ConfigError;
use crate::http::handler::{status_response, Handler, HttpRequest, HttpResponse, SharedHandler};

const DEFAULT_REALM: &str = "edge-proxy";

/// Parsed, validated basic-auth policy. Parsing happens at build time so a
/// malformed user list is a configuration error, not a request-time surprise.
pub struct BasicAuthConfig {
    users: Vec<(String, String)>,
    challenge: HeaderValue,
    header_field: Option<header::HeaderName>,
}

impl BasicAuthConfig {
    pub fn parse(
        middleware_name: &str,
        users: &[String],
        realm: Option<&str>,
        header_field: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let mut parsed = Vec::with_capacity(users.len());
        for entry in users {
            let (user, password) =
                entry
                    .split_once(':')
                    .ok_or_else(|| ConfigError::InvalidMiddleware {
                        name: middleware_name.to_string(),
                        reason: format!("malformed user entry {entry:?}"),
                    })?;
            parsed.push((user.to_string(), password.to_string()));
        }

        let realm = realm.unwrap_or(DEFAULT_REALM);
        let challenge = HeaderValue::from_str(&format!("Basic realm={realm:?}")).map_err(|e| {
            ConfigError::InvalidMiddleware {
                name: middleware_name.to_string(),
                reason: format!("invalid realm {realm:?}: {e}"),
            }
        })?;

        let header_field = match header_field {
            Some(name) => Some(name.parse().map_err(|e| ConfigError::InvalidMiddleware {
                name: middleware_name.to_string(),
                reason: format!("invalid header field {name:?}: {e}"),
            })?),
            None => None,
        };

        Ok(Self {
            users: parsed,
            challenge,
            header_field,
        })
    }

    pub fn wrap(self, next: SharedHandler) -> SharedHandler {
        Arc::new(BasicAuthMiddleware { config: self, next })
    }
}

/// Challenges requests with `401` unless they carry valid credentials.
struct BasicAuthMiddleware {
    config: BasicAuthConfig,
    next: SharedHandler,
}

impl BasicAuthMiddleware {
    /// The authenticated user name, if the request carries valid credentials.
    fn authenticate(&self, req: &HttpRequest) -> Option<String> {
        let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
        let encoded = value.strip_prefix("Basic ")?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        self.config
            .users
            .iter()
            .any(|(u, p)| u == user && p == password)
            .then(|| user.to_string())
    }
}

impl Handler for BasicAuthMiddleware {
    fn call(&self, mut req: HttpRequest) -> BoxFuture<'static, HttpResponse> {
        match self.authenticate(&req) {
            Some(user) => {
                if let Some(field) = &self.config.header_field {
                    if let Ok(value) = HeaderValue::from_str(&user) {
                        req.headers_mut().insert(field.clone(), value);
                    }
                }
                self.next.call(req)
            }
            None => {
                let challenge = self.config.challenge.clone();
                Box::pin(async move {
                    let mut resp = status_response(StatusCode::UNAUTHORIZED, "Unauthorized");
                    resp.headers_mut()
                        .insert(header::WWW_AUTHENTICATE, challenge);
                    resp
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::handler_fn;
    use axum::body::Body;
    use axum::http::Request;

    fn auth(users: &[&str]) -> SharedHandler {
        let users: Vec<String> = users.iter().map(|s| s.to_string()).collect();
        let inner = handler_fn(|_req| async { status_response(StatusCode::OK, "granted") });
        BasicAuthConfig::parse("auth@file", &users, None, Some("X-User"))
            .unwrap()
            .wrap(inner)
    }

    fn request(credentials: Option<&str>) -> HttpRequest {
        let mut builder = Request::builder();
        if let Some(creds) = credentials {
            let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
            builder = builder.header("Authorization", format!("Basic {encoded}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn missing_credentials_are_challenged() {
        let resp = auth(&["alice:secret"]).call(request(None)).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key("www-authenticate"));
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let resp = auth(&["alice:secret"])
            .call(request(Some("alice:nope")))
            .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_credentials_pass_through() {
        let resp = auth(&["alice:secret"])
            .call(request(Some("alice:secret")))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn malformed_user_entries_fail_the_build() {
        let result = BasicAuthConfig::parse("auth@file", &["no-colon".to_string()], None, None);
        assert!(result.is_err());
    }
}
