//! Authentication-affinity layer.
//!
//! NTLM and Kerberos (`Negotiate`) challenge-response authentication binds to
//! a single underlying TCP connection, not to the logical request. The caller
//! creates one [`AffinitySession`] per logical client session and attaches it
//! to every request's extensions. When a backend answers with
//! `WWW-Authenticate: NTLM` or `WWW-Authenticate: Negotiate`, the layer
//! lazily builds a dedicated, non-shared transport for that session; every
//! later request carrying the same session goes through it, so all
//! handshake-dependent requests land on one physical connection. Requests
//! without a session always use the shared pooled transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use axum::http::header;
use dashmap::DashMap;
use futures_util::future::BoxFuture;

use crate::http::handler::{HttpRequest, HttpResponse};
use crate::transport::{RoundTripper, TransportError};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

type SessionSlots = DashMap<u64, Arc<dyn RoundTripper>>;

/// Factory for the dedicated transports allocated on an NTLM challenge.
pub type DedicatedFactory = Arc<dyn Fn() -> Arc<dyn RoundTripper> + Send + Sync>;

/// Marker for one logical outbound session, cloned into request extensions.
///
/// Dropping the last clone releases the session's dedicated transport.
#[derive(Clone)]
pub struct AffinitySession {
    inner: Arc<SessionHandle>,
}

struct SessionHandle {
    id: u64,
    slots: Weak<SessionSlots>,
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(slots) = self.slots.upgrade() {
            slots.remove(&self.id);
        }
    }
}

impl AffinitySession {
    fn id(&self) -> u64 {
        self.inner.id
    }
}

/// The outermost transport layer: shared pool by default, per-session
/// dedicated transports once a backend demands connection-bound auth.
pub struct AffinityTransport {
    shared: Arc<dyn RoundTripper>,
    dedicated_factory: DedicatedFactory,
    slots: Arc<SessionSlots>,
}

impl AffinityTransport {
    pub fn new(shared: Arc<dyn RoundTripper>, dedicated_factory: DedicatedFactory) -> Self {
        Self {
            shared,
            dedicated_factory,
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Create a session marker for one logical client connection.
    pub fn new_session(&self) -> AffinitySession {
        AffinitySession {
            inner: Arc::new(SessionHandle {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                slots: Arc::downgrade(&self.slots),
            }),
        }
    }

    /// Number of sessions currently pinned to a dedicated transport.
    pub fn pinned_sessions(&self) -> usize {
        self.slots.len()
    }

    fn transport_for(&self, session: Option<&AffinitySession>) -> Arc<dyn RoundTripper> {
        session
            .and_then(|s| self.slots.get(&s.id()).map(|entry| entry.value().clone()))
            .unwrap_or_else(|| self.shared.clone())
    }
}

/// Whether the response demands connection-bound authentication.
fn demands_connection_auth(resp: &HttpResponse) -> bool {
    resp.headers()
        .get_all(header::WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| {
            let scheme = v.split_whitespace().next().unwrap_or(v);
            scheme.eq_ignore_ascii_case("NTLM") || scheme.eq_ignore_ascii_case("Negotiate")
        })
}

impl RoundTripper for AffinityTransport {
    fn round_trip(
        &self,
        mut req: HttpRequest,
    ) -> BoxFuture<'static, Result<HttpResponse, TransportError>> {
        let session = req.extensions_mut().remove::<AffinitySession>();
        let transport = self.transport_for(session.as_ref());
        let factory = self.dedicated_factory.clone();
        let slots = self.slots.clone();
        Box::pin(async move {
            let resp = transport.round_trip(req).await?;
            if let Some(session) = session {
                if demands_connection_auth(&resp) {
                    slots.entry(session.id()).or_insert_with(|| factory());
                }
            }
            Ok(resp)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, Response};
    use std::sync::atomic::AtomicUsize;

    /// Counts calls and answers with a fixed WWW-Authenticate header.
    struct CountingTransport {
        calls: Arc<AtomicUsize>,
        challenge: Option<&'static str>,
    }

    impl RoundTripper for CountingTransport {
        fn round_trip(
            &self,
            _req: HttpRequest,
        ) -> BoxFuture<'static, Result<HttpResponse, TransportError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let challenge = self.challenge;
            Box::pin(async move {
                let mut builder = Response::builder().status(401);
                if let Some(c) = challenge {
                    builder = builder.header("WWW-Authenticate", c);
                }
                Ok(builder.body(Body::empty()).unwrap())
            })
        }
    }

    fn layer(
        challenge: Option<&'static str>,
    ) -> (AffinityTransport, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let shared_calls = Arc::new(AtomicUsize::new(0));
        let dedicated_calls = Arc::new(AtomicUsize::new(0));
        let shared = Arc::new(CountingTransport {
            calls: shared_calls.clone(),
            challenge,
        });
        let dedicated_counter = dedicated_calls.clone();
        let factory: DedicatedFactory = Arc::new(move || {
            Arc::new(CountingTransport {
                calls: dedicated_counter.clone(),
                challenge: None,
            }) as Arc<dyn RoundTripper>
        });
        (
            AffinityTransport::new(shared, factory),
            shared_calls,
            dedicated_calls,
        )
    }

    fn request(session: Option<AffinitySession>) -> HttpRequest {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        if let Some(s) = session {
            req.extensions_mut().insert(s);
        }
        req
    }

    #[tokio::test]
    async fn ntlm_challenge_pins_the_session_to_a_dedicated_transport() {
        let (layer, shared, dedicated) = layer(Some("NTLM"));
        let session = layer.new_session();

        layer.round_trip(request(Some(session.clone()))).await.unwrap();
        assert_eq!(shared.load(Ordering::SeqCst), 1);
        assert_eq!(layer.pinned_sessions(), 1);

        layer.round_trip(request(Some(session.clone()))).await.unwrap();
        layer.round_trip(request(Some(session))).await.unwrap();
        assert_eq!(shared.load(Ordering::SeqCst), 1);
        assert_eq!(dedicated.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn negotiate_also_triggers_affinity() {
        let (layer, _, _) = layer(Some("Negotiate realm=x"));
        let session = layer.new_session();
        layer.round_trip(request(Some(session.clone()))).await.unwrap();
        assert_eq!(layer.pinned_sessions(), 1);
        drop(session);
    }

    #[tokio::test]
    async fn requests_without_a_session_stay_on_the_shared_pool() {
        let (layer, shared, dedicated) = layer(Some("NTLM"));
        layer.round_trip(request(None)).await.unwrap();
        layer.round_trip(request(None)).await.unwrap();
        assert_eq!(shared.load(Ordering::SeqCst), 2);
        assert_eq!(dedicated.load(Ordering::SeqCst), 0);
        assert_eq!(layer.pinned_sessions(), 0);
    }

    #[tokio::test]
    async fn other_auth_schemes_do_not_pin() {
        let (layer, _, _) = layer(Some("Basic realm=x"));
        let session = layer.new_session();
        layer.round_trip(request(Some(session))).await.unwrap();
        assert_eq!(layer.pinned_sessions(), 0);
    }

    #[tokio::test]
    async fn dropping_the_session_releases_the_slot() {
        let (layer, _, _) = layer(Some("NTLM"));
        let session = layer.new_session();
        layer.round_trip(request(Some(session.clone()))).await.unwrap();
        assert_eq!(layer.pinned_sessions(), 1);
        drop(session);
        assert_eq!(layer.pinned_sessions(), 0);
    }
}
