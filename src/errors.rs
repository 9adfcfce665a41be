//! Entity-build error taxonomy.
//!
//! Configuration errors are recorded on the entity that caused them and never
//! abort a whole configuration generation; the entity simply becomes
//! unreachable.

use thiserror::Error;

/// Error raised while building one router, middleware or service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("service \"{0}\" does not exist")]
    UnknownService(String),

    #[error("middleware \"{0}\" does not exist")]
    UnknownMiddleware(String),

    #[error("TLS options \"{0}\" do not exist")]
    UnknownTlsOptions(String),

    #[error("invalid rule {rule:?}: {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("the priority value {0} exceeds the max user-defined priority {max}", max = i32::MAX - 1)]
    PriorityExceeded(i64),

    #[error("service \"{0}\" has no load-balancer configured")]
    NoLoadBalancer(String),

    #[error("invalid server URL {url:?} in service \"{service}\": {reason}")]
    InvalidServerUrl {
        service: String,
        url: String,
        reason: String,
    },

    #[error("middleware chain \"{0}\" references itself")]
    ChainCycle(String),

    #[error("middleware \"{name}\": {reason}")]
    InvalidMiddleware { name: String, reason: String },

    #[error("transport \"{0}\": SPIFFE and classic TLS options are mutually exclusive")]
    ConflictingTls(String),

    #[error("transport error: {0}")]
    Transport(String),
}
