//! Settings structure.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::{DEFAULT_FRONTEND_RULE, DEFAULT_PREFIX};
use crate::provider::BackoffPolicy;
use crate::sources::StoreBackend;

/// Settings of every configured worker.
///
/// Sections left out of the settings sources stay `None` and start no worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Consul catalog worker.
    pub catalog: Option<CatalogSettings>,
    /// KV-tree worker.
    pub kv: Option<KvSettings>,
    /// Retry delays shared by all workers.
    pub backoff: BackoffSettings,
    /// Capacity of the output channel.
    pub channel_capacity: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            catalog: None,
            kv: None,
            backoff: BackoffSettings::default(),
            channel_capacity: 16,
        }
    }
}

/// Consul catalog source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Agent address; `http://` is assumed without a scheme.
    pub endpoint: String,
    /// ACL token.
    pub token: Option<String>,
    /// Datacenter to query.
    pub datacenter: Option<String>,
    /// Tag prefix, e.g. `traefik`.
    pub prefix: String,
    /// Domain substituted for `.Domain` in rule templates.
    pub domain: String,
    /// Whether services without an `enable` tag are exposed.
    pub exposed_by_default: bool,
    /// Default frontend rule template.
    pub frontend_rule: String,
    /// Constraint expressions, e.g. `tag==us-*`.
    pub constraints: Vec<String>,
    /// Blocking query wait, in milliseconds.
    pub wait_time_ms: u64,
    /// Client TLS options.
    pub tls: Option<ClientTlsSettings>,
}

impl CatalogSettings {
    /// Provider name attached to published messages.
    pub const PROVIDER_NAME: &'static str = "consul_catalog";

    /// Endpoint with a scheme.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            let scheme = if self.tls.is_some() { "https" } else { "http" };
            format!("{}://{}", scheme, self.endpoint)
        }
    }

    /// Blocking query wait.
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:8500".to_string(),
            token: None,
            datacenter: None,
            prefix: DEFAULT_PREFIX.to_string(),
            domain: String::new(),
            exposed_by_default: true,
            frontend_rule: DEFAULT_FRONTEND_RULE.to_string(),
            constraints: Vec::new(),
            wait_time_ms: 15_000,
            tls: None,
        }
    }
}

/// Client TLS options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientTlsSettings {
    /// PEM bundle of extra trusted roots.
    pub ca_file: Option<PathBuf>,
    /// Skip server certificate verification.
    pub insecure_skip_verify: bool,
}

/// KV-tree source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvSettings {
    /// Store kind; also the provider name.
    pub backend: StoreBackend,
    /// Store addresses.
    pub endpoints: Vec<String>,
    /// Root key of the tree.
    pub prefix: String,
    /// Keep watching after the first load.
    pub watch: bool,
    /// Store user.
    pub username: Option<String>,
    /// Store password.
    pub password: Option<String>,
    /// Constraint expressions matched against `/tags` keys.
    pub constraints: Vec<String>,
}

impl Default for KvSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Consul,
            endpoints: vec!["127.0.0.1:8500".to_string()],
            prefix: "/traefik".to_string(),
            watch: true,
            username: None,
            password: None,
            constraints: Vec::new(),
        }
    }
}

/// Retry delay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    /// First delay, in milliseconds.
    pub initial_interval_ms: u64,
    /// Largest delay, in milliseconds.
    pub max_interval_ms: u64,
    /// Growth factor.
    pub multiplier: f64,
    /// Downward jitter fraction.
    pub randomization_factor: f64,
}

impl BackoffSettings {
    /// The policy these settings describe.
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            multiplier: self.multiplier,
            randomization_factor: self.randomization_factor,
        }
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            max_interval_ms: 60_000,
            multiplier: 1.5,
            randomization_factor: 0.5,
        }
    }
}
