//! Edge proxy request-delivery core.
//!
//! From a resolved configuration snapshot to live per-entry-point handlers:
//! qualified name resolution, pooled outbound transports, weighted balancing
//! with sticky sessions and health checks, composable middleware chains and
//! priority-ordered rule dispatch, rebuilt wholesale on every configuration
//! generation while requests keep flowing against the previous one.

pub mod config;
pub mod errors;
pub mod http;
pub mod middleware;
pub mod muxer;
pub mod provider;
pub mod router;
pub mod service;
pub mod transport;

pub use config::loader::load_config;
pub use config::schema::ProxyConfig;
pub use errors::ConfigError;
pub use router::{Generation, RouterManager};
pub use transport::{TransportManager, TransportRegistry};
