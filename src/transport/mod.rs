//! Outbound transport subsystem.
//!
//! # Data Flow
//! ```text
//! TransportSpec (named, from the dynamic config)
//!     → builder.rs (dial policy, client TLS, HTTP/2 negotiation)
//!     → affinity.rs (NTLM/Negotiate connection pinning, outermost)
//!     → manager.rs (cache keyed by name, pool-preserving updates)
//!     → consumed by the service builder and health checks
//! ```
//!
//! # Design Decisions
//! - Unchanged specs keep their built transport so connection pools survive
//!   configuration reloads
//! - A transport that fails to build falls back to the default transport;
//!   requests never fail because of a broken transport declaration
//! - Custom connectivity (proxies, SPIFFE identities) comes from an explicit
//!   registry passed to the manager, never from process-global state

pub mod affinity;
pub mod builder;
pub mod manager;
pub mod registry;

use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::http::handler::{HttpRequest, HttpResponse};

/// Name under which the implicit default transport is registered.
pub const DEFAULT_TRANSPORT: &str = "default@internal";

/// An outbound HTTP round tripper.
pub trait RoundTripper: Send + Sync {
    fn round_trip(
        &self,
        req: HttpRequest,
    ) -> BoxFuture<'static, Result<HttpResponse, TransportError>>;
}

/// Request-time transport failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("servers transport \"{0}\" not found")]
    NotFound(String),

    #[error("timed out waiting {0:?} for response headers")]
    ResponseHeaderTimeout(Duration),

    #[error(transparent)]
    Client(#[from] hyper_util::client::legacy::Error),
}

pub use affinity::{AffinitySession, AffinityTransport};
pub use manager::TransportManager;
pub use registry::TransportRegistry;
