//! Backend services: balancing, stickiness, forwarding and health.
//!
//! # Data Flow
//! Router handler -> [`Balancer`] (sticky lookup, weighted pick) ->
//! [`Pipelining`] (abort-eligibility marker) -> [`ServerHandler`]
//! (URI rewrite, transport round trip).
//!
//! [`Balancer`]: balancer::Balancer
//! [`Pipelining`]: pipelining::Pipelining
//! [`ServerHandler`]: proxy::ServerHandler

pub mod balancer;
pub mod builder;
pub mod cookie;
pub mod healthcheck;
pub mod pipelining;
pub mod proxy;

pub use balancer::Balancer;
pub use builder::ServiceManager;
pub use healthcheck::HealthCheck;
