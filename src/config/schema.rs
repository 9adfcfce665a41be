//! Configuration schema definitions.
//!
//! This module defines the full configuration structure consumed by the core:
//! a static section (entry points) plus the dynamic section (routers,
//! middlewares, services, transports) that is rebuilt wholesale on every
//! configuration generation. All types derive Serde traits so snapshots can
//! be loaded from TOML files or handed over by a configuration provider.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Named listening contexts routers attach to.
    pub entry_points: HashMap<String, EntryPointConfig>,

    /// The dynamic, hot-reloadable section.
    #[serde(flatten)]
    pub dynamic: DynamicConfig,
}

/// A named listening context.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntryPointConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub address: String,
}

/// One resolved configuration snapshot.
///
/// Snapshots are replaced wholesale per generation; there is no incremental
/// patching of a single entity.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct DynamicConfig {
    pub routers: HashMap<String, RouterSpec>,
    pub middlewares: HashMap<String, MiddlewareSpec>,
    pub services: HashMap<String, ServiceSpec>,
    pub transports: HashMap<String, TransportSpec>,
    pub tls_options: HashMap<String, TlsOptionsSpec>,
}

/// A rule-to-service binding.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RouterSpec {
    /// Match expression, consumed by the rule matcher (e.g. ``Host(`a.b`)``).
    pub rule: String,

    /// Ordered middleware references applied before the service.
    pub middlewares: Vec<String>,

    /// Service reference the router forwards to.
    pub service: String,

    /// Match priority; 0 means "derive from rule length".
    pub priority: i64,

    /// Entry points this router is attached to; empty means all.
    pub entry_points: Vec<String>,

    /// TLS configuration; presence selects the router for TLS entry points.
    pub tls: Option<RouterTlsSpec>,
}

/// Router-level TLS selection.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RouterTlsSpec {
    /// Named TLS options reference; empty means provider defaults.
    pub options: String,
}

/// Listener-side TLS tuning referenced by routers.
///
/// Certificate issuance and rotation happen outside this core; only the
/// reference integrity is validated here.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TlsOptionsSpec {
    pub min_version: Option<String>,
    pub sni_strict: bool,
}

/// A middleware declaration: exactly one behavior per entity.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MiddlewareSpec {
    /// Prepend a fixed prefix to the request path.
    AddPrefix { prefix: String },

    /// Remove the first matching prefix from the request path.
    StripPrefix { prefixes: Vec<String> },

    /// Inject fixed request and/or response headers.
    Headers {
        #[serde(default)]
        request: HashMap<String, String>,
        #[serde(default)]
        response: HashMap<String, String>,
    },

    /// HTTP basic authentication against a static user list.
    BasicAuth {
        /// Entries of the form `user:password`.
        users: Vec<String>,
        #[serde(default)]
        realm: Option<String>,
        /// Header to carry the authenticated user name upstream.
        #[serde(default)]
        header_field: Option<String>,
    },

    /// An ordered list of further middleware references, spliced in place.
    Chain { middlewares: Vec<String> },
}

/// A named backend target.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServiceSpec {
    /// The only supported balancing policy; absent means the service cannot
    /// be built.
    pub load_balancer: Option<LoadBalancerSpec>,
}

/// Weighted round-robin policy over a set of servers.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoadBalancerSpec {
    pub servers: Vec<ServerSpec>,

    /// Cookie-based session pinning.
    pub sticky: Option<StickySpec>,

    /// Periodic probe policy; registered once per balancer handle.
    pub health_check: Option<HealthCheckSpec>,

    /// Forward the client's Host header instead of the target's.
    pub pass_host_header: bool,

    /// Response streaming cadence.
    pub response_forwarding: ResponseForwardingSpec,

    /// Named transport used to reach the servers; empty means the default.
    pub servers_transport: String,
}

impl Default for LoadBalancerSpec {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            sticky: None,
            health_check: None,
            pass_host_header: true,
            response_forwarding: ResponseForwardingSpec::default(),
            servers_transport: String::new(),
        }
    }
}

/// One backend server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerSpec {
    /// Base URL (e.g., "http://127.0.0.1:3000").
    pub url: String,

    /// Relative selection weight.
    pub weight: u32,
}

impl Default for ServerSpec {
    fn default() -> Self {
        Self {
            url: String::new(),
            weight: 1,
        }
    }
}

/// Sticky-session policy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct StickySpec {
    pub cookie: CookieSpec,
}

/// Pinning cookie attributes.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct CookieSpec {
    /// Cookie name; empty derives a short hash of the service name.
    pub name: String,
    pub secure: bool,
    pub http_only: bool,
}

/// Active health-check policy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct HealthCheckSpec {
    /// Path probed on each server.
    pub path: String,

    /// Probe interval in seconds; non-positive overrides are rejected.
    pub interval_secs: Option<i64>,

    /// Probe timeout in seconds; non-positive overrides are rejected.
    pub timeout_secs: Option<i64>,

    /// Extra headers sent with every probe.
    pub headers: HashMap<String, String>,
}

/// Response streaming cadence for the forwarding proxy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ResponseForwardingSpec {
    /// How often buffered response bytes are flushed to the client, in
    /// milliseconds.
    pub flush_interval_ms: u64,
}

impl Default for ResponseForwardingSpec {
    fn default() -> Self {
        Self {
            flush_interval_ms: 100,
        }
    }
}

/// A named outbound-connection policy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TransportSpec {
    /// TLS server-name override.
    pub server_name: Option<String>,

    /// Skip server certificate verification.
    pub insecure_skip_verify: bool,

    /// PEM files added to the root CA pool.
    pub root_cas: Vec<String>,

    /// Client certificates presented to the backend.
    pub certificates: Vec<ClientCertSpec>,

    /// SPIFFE mTLS policy; mutually exclusive with the classic TLS fields.
    pub spiffe: Option<SpiffeSpec>,

    /// Outbound proxy URL; requires a registered connector provider.
    pub proxy_url: Option<String>,

    /// Dial/response/idle timeouts.
    pub forwarding_timeouts: ForwardingTimeouts,

    /// Maximum idle pooled connections per backend host.
    pub max_idle_conns_per_host: Option<usize>,

    /// Disable the HTTP/2-capable negotiating layer.
    pub disable_http2: bool,
}

/// A client certificate/key pair, as PEM file paths.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ClientCertSpec {
    pub cert_file: String,
    pub key_file: String,
}

/// SPIFFE trust policy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct SpiffeSpec {
    /// Allowed SPIFFE IDs; empty means any ID in the trust domain.
    pub ids: Vec<String>,

    /// Expected trust domain when `ids` is empty.
    pub trust_domain: Option<String>,
}

/// Outbound timeout knobs.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ForwardingTimeouts {
    /// TCP dial timeout in seconds.
    pub dial_secs: u64,

    /// Time allowed for the backend's response headers; 0 disables.
    pub response_header_secs: u64,

    /// Idle pooled-connection timeout in seconds.
    pub idle_conn_secs: u64,
}

impl Default for ForwardingTimeouts {
    fn default() -> Self {
        Self {
            dial_secs: 30,
            response_header_secs: 0,
            idle_conn_secs: 90,
        }
    }
}

impl TransportSpec {
    /// True when any classic TLS field is set.
    pub fn has_classic_tls(&self) -> bool {
        self.server_name.is_some()
            || self.insecure_skip_verify
            || !self.root_cas.is_empty()
            || !self.certificates.is_empty()
    }

    /// True when the transport needs a TLS client configuration at all.
    pub fn needs_tls(&self) -> bool {
        self.has_classic_tls() || self.spiffe.is_some()
    }
}
