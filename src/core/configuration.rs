//! The routing configuration published to downstream consumers.
//!
//! Maps are ordered so that two configurations built from the same input
//! compare and serialize identically.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A complete routing configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Backends keyed by name.
    #[serde(default)]
    pub backends: BTreeMap<String, Backend>,
    /// Frontends keyed by name.
    #[serde(default)]
    pub frontends: BTreeMap<String, Frontend>,
    /// Certificates served on entry points.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<TlsConfiguration>,
}

impl Configuration {
    /// Remove every frontend whose backend is not defined.
    ///
    /// Returns the names of the removed frontends.
    pub fn drop_dangling_frontends(&mut self) -> Vec<String> {
        let dangling: Vec<String> = self
            .frontends
            .iter()
            .filter(|(_, frontend)| !self.backends.contains_key(&frontend.backend))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &dangling {
            self.frontends.remove(name);
        }
        dangling
    }

    /// Whether every frontend references a defined backend.
    pub fn is_consistent(&self) -> bool {
        self.frontends
            .values()
            .all(|frontend| self.backends.contains_key(&frontend.backend))
    }
}

/// A pool of servers plus its balancing and resilience policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    /// Servers keyed by name.
    #[serde(default)]
    pub servers: BTreeMap<String, Server>,
    /// Circuit breaker, when an expression is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreaker>,
    /// Load balancer policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancer>,
    /// Connection limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_conn: Option<MaxConn>,
    /// Active health check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

/// One upstream server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// `scheme://host:port`.
    pub url: String,
    /// Relative weight for weighted balancing.
    pub weight: i32,
}

/// Load balancer policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    /// Balancing method, e.g. `wrr` or `drr`.
    pub method: String,
    /// Deprecated sticky flag, kept for consumers that still read it.
    #[serde(default)]
    pub sticky: bool,
    /// Cookie based session affinity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stickiness: Option<Stickiness>,
}

/// Session affinity settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stickiness {
    /// Cookie name; empty lets the proxy choose one.
    #[serde(default)]
    pub cookie_name: String,
}

/// Circuit breaker trip expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreaker {
    /// e.g. `NetworkErrorRatio() > 0.5`.
    pub expression: String,
}

/// Connection limit per source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxConn {
    /// Maximum simultaneous connections.
    pub amount: i64,
    /// Request property the limit is keyed by.
    pub extractor_func: String,
}

/// Active health check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Probe path.
    pub path: String,
    /// Probe interval, e.g. `30s`.
    pub interval: String,
}

/// A routing rule set bound to a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frontend {
    /// Name of the backend traffic is forwarded to.
    pub backend: String,
    /// Routes keyed by name.
    #[serde(default)]
    pub routes: BTreeMap<String, Route>,
    /// Entry points this frontend listens on; empty means all.
    #[serde(default)]
    pub entry_points: Vec<String>,
    /// Forward the client `Host` header.
    #[serde(default)]
    pub pass_host_header: bool,
    /// `user:hash` credentials.
    #[serde(default)]
    pub basic_auth: Vec<String>,
    /// Allowed client CIDR ranges.
    #[serde(default)]
    pub whitelist_source_range: Vec<String>,
    /// Matching priority.
    #[serde(default)]
    pub priority: i32,
}

/// One matching rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Rule expression, e.g. `Host:web.example.com`.
    pub rule: String,
}

/// A certificate bound to entry points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfiguration {
    /// Entry points the certificate is served on.
    #[serde(default)]
    pub entry_points: Vec<String>,
    /// Certificate material.
    pub certificate: Certificate,
}

/// Certificate and key locations or inline PEM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// Certificate file or PEM content.
    pub cert_file: String,
    /// Key file or PEM content.
    pub key_file: String,
}

/// A configuration tagged with the provider that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMessage {
    /// Provider name, e.g. `consul_catalog` or `etcd`.
    pub provider_name: String,
    /// The snapshot.
    pub configuration: Configuration,
}
