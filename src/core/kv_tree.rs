//! KV-tree pipeline: walk `backends/`, `frontends/` and `tlsconfiguration/`
//! below a root key, then render the routing configuration.
//!
//! Layout below the root:
//!
//! ```text
//! /tags                                           constraint tags of the whole tree
//! /backends/<b>/servers/<s>/url|weight|tags
//! /backends/<b>/circuitbreaker/expression
//! /backends/<b>/loadbalancer/method|sticky|stickiness|stickiness/cookiename
//! /backends/<b>/maxconn/amount|extractorfunc
//! /backends/<b>/healthcheck/path|interval
//! /frontends/<f>/backend|priority|passHostHeader|entrypoints|basicauth|whitelistsourcerange
//! /frontends/<f>/routes/<r>/rule
//! /tlsconfiguration/<t>/entrypoints|certificate/certfile|certificate/keyfile
//! ```

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::core::attributes::parse_bool;
use crate::core::catalog::{
    DEFAULT_HEALTHCHECK_INTERVAL, DEFAULT_MAXCONN_EXTRACTOR, DEFAULT_WEIGHT, max_conn,
};
use crate::core::configuration::{
    Backend, Certificate, CircuitBreaker, Configuration, Frontend, HealthCheck, LoadBalancer,
    Route, Server, Stickiness, TlsConfiguration,
};
use crate::core::constraints::{Constraint, first_failing};
use crate::sources::{KeyTreeReader, KvStore, last_segment};

/// A server entry as read from the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvServer {
    /// Server name.
    pub name: String,
    /// Server URL.
    pub url: String,
    /// Raw weight; empty when unset.
    pub weight: String,
}

/// A backend entry as read from the tree. Values are raw strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvBackend {
    /// Backend name.
    pub name: String,
    /// Servers that have a url and pass the constraints.
    pub servers: Vec<KvServer>,
    /// `circuitbreaker/expression`.
    pub circuit_breaker: String,
    /// `loadbalancer/method`.
    pub lb_method: String,
    /// Deprecated `loadbalancer/sticky`.
    pub lb_sticky: String,
    /// `loadbalancer/stickiness`.
    pub lb_stickiness: String,
    /// `loadbalancer/stickiness/cookiename`.
    pub cookie_name: String,
    /// `maxconn/amount`.
    pub maxconn_amount: String,
    /// `maxconn/extractorfunc`.
    pub maxconn_extractor: String,
    /// `healthcheck/path`.
    pub healthcheck_path: String,
    /// `healthcheck/interval`, defaulted.
    pub healthcheck_interval: String,
}

/// A frontend entry as read from the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvFrontend {
    /// Frontend name.
    pub name: String,
    /// Referenced backend name.
    pub backend: String,
    /// Raw priority.
    pub priority: String,
    /// Raw pass-host-header flag.
    pub pass_host_header: String,
    /// Entry points.
    pub entry_points: Vec<String>,
    /// `user:hash` credentials.
    pub basic_auth: Vec<String>,
    /// Allowed source ranges.
    pub whitelist_source_range: Vec<String>,
    /// Route name to rule.
    pub routes: BTreeMap<String, String>,
}

/// A TLS entry as read from the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvTls {
    /// Entry name.
    pub name: String,
    /// Entry points.
    pub entry_points: Vec<String>,
    /// Certificate file or PEM content.
    pub cert_file: String,
    /// Key file or PEM content.
    pub key_file: String,
}

/// Everything read from one walk of the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvSnapshot {
    /// Backends in key order.
    pub backends: Vec<KvBackend>,
    /// Frontends in key order.
    pub frontends: Vec<KvFrontend>,
    /// TLS entries in key order.
    pub tls: Vec<KvTls>,
}

/// Walks a key tree into a [`KvSnapshot`].
///
/// # Examples
///
/// ```rust
/// use routesync::core::{KvTreeBuilder, render_kv};
/// use routesync::sources::{KeyTreeReader, MemoryKvStore, StoreBackend};
///
/// # async fn example() {
/// let store = MemoryKvStore::new();
/// store.put("/traefik/backends/web/servers/s1/url", "http://10.0.0.1:80");
/// store.put("/traefik/frontends/web/backend", "web");
///
/// let reader = KeyTreeReader::new(store, StoreBackend::Consul);
/// let builder = KvTreeBuilder::new("/traefik", Vec::new());
/// let snapshot = builder.load(&reader).await.unwrap();
/// let configuration = render_kv(&snapshot);
/// assert!(configuration.frontends.contains_key("web"));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct KvTreeBuilder {
    root: String,
    constraints: Vec<Constraint>,
}

impl KvTreeBuilder {
    /// Create a builder for the tree below `root`.
    pub fn new(root: impl Into<String>, constraints: Vec<Constraint>) -> Self {
        let root = root.into();
        Self {
            root: root.trim_end_matches('/').to_string(),
            constraints,
        }
    }

    /// Root key, without a trailing `/`.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Walk the tree.
    ///
    /// Returns `None` when the root's `/tags` fail the constraints; nothing
    /// should be published in that case.
    pub async fn load<S: KvStore>(&self, reader: &KeyTreeReader<S>) -> Option<KvSnapshot> {
        if !self.satisfies_constraints(reader, &self.root).await {
            debug!(root = %self.root, "Key tree excluded by constraints");
            return None;
        }

        let mut snapshot = KvSnapshot::default();

        for backend in reader.list(&[&self.root, "/backends/"]).await {
            snapshot.backends.push(self.load_backend(reader, &backend).await);
        }

        for frontend in reader.list(&[&self.root, "/frontends/"]).await {
            let mut routes = BTreeMap::new();
            for route in reader.list(&[&frontend, "/routes/"]).await {
                routes.insert(
                    last_segment(&route).to_string(),
                    reader.get("", &[&route, "/rule"]).await,
                );
            }
            snapshot.frontends.push(KvFrontend {
                name: last_segment(&frontend).to_string(),
                backend: reader.get("", &[&frontend, "/backend"]).await,
                priority: reader.get("", &[&frontend, "/priority"]).await,
                pass_host_header: reader.get("", &[&frontend, "/passHostHeader"]).await,
                entry_points: reader.split_get(&[&frontend, "/entrypoints"]).await,
                basic_auth: reader.split_get(&[&frontend, "/basicauth"]).await,
                whitelist_source_range: reader
                    .split_get(&[&frontend, "/whitelistsourcerange"])
                    .await,
                routes,
            });
        }

        for tls in reader.list(&[&self.root, "/tlsconfiguration/"]).await {
            snapshot.tls.push(KvTls {
                name: last_segment(&tls).to_string(),
                entry_points: reader.split_get(&[&tls, "/entrypoints"]).await,
                cert_file: reader.get("", &[&tls, "/certificate/certfile"]).await,
                key_file: reader.get("", &[&tls, "/certificate/keyfile"]).await,
            });
        }

        Some(snapshot)
    }

    async fn load_backend<S: KvStore>(&self, reader: &KeyTreeReader<S>, backend: &str) -> KvBackend {
        let mut servers = Vec::new();
        for server in reader.list(&[backend, "/servers/"]).await {
            if !reader.exists(&[&server, "/url"]).await {
                debug!(server = %server, "Skipping server without url");
                continue;
            }
            if !self.satisfies_constraints(reader, &server).await {
                debug!(server = %server, "Server excluded by constraints");
                continue;
            }
            servers.push(KvServer {
                name: last_segment(&server).to_string(),
                url: reader.get("", &[&server, "/url"]).await,
                weight: reader.get("", &[&server, "/weight"]).await,
            });
        }

        KvBackend {
            name: last_segment(backend).to_string(),
            servers,
            circuit_breaker: reader.get("", &[backend, "/circuitbreaker/expression"]).await,
            lb_method: reader.get("", &[backend, "/loadbalancer/method"]).await,
            lb_sticky: reader.get("", &[backend, "/loadbalancer/sticky"]).await,
            lb_stickiness: reader.get("", &[backend, "/loadbalancer/stickiness"]).await,
            cookie_name: reader
                .get("", &[backend, "/loadbalancer/stickiness/cookiename"])
                .await,
            maxconn_amount: reader.get("", &[backend, "/maxconn/amount"]).await,
            maxconn_extractor: reader
                .get(DEFAULT_MAXCONN_EXTRACTOR, &[backend, "/maxconn/extractorfunc"])
                .await,
            healthcheck_path: reader.get("", &[backend, "/healthcheck/path"]).await,
            healthcheck_interval: reader
                .get(DEFAULT_HEALTHCHECK_INTERVAL, &[backend, "/healthcheck/interval"])
                .await,
        }
    }

    async fn satisfies_constraints<S: KvStore>(&self, reader: &KeyTreeReader<S>, key: &str) -> bool {
        if self.constraints.is_empty() {
            return true;
        }
        let tags = reader.split_get(&[key, "/tags"]).await;
        match first_failing(&self.constraints, &tags) {
            Some(constraint) => {
                debug!(key, constraint = %constraint, "Constraint not satisfied");
                false
            }
            None => true,
        }
    }
}

/// Render a [`KvSnapshot`] into a configuration.
///
/// Frontends whose backend is not defined are dropped.
pub fn render_kv(snapshot: &KvSnapshot) -> Configuration {
    let mut configuration = Configuration::default();

    for entry in &snapshot.backends {
        let backend = render_backend(entry);
        configuration.backends.insert(entry.name.clone(), backend);
    }

    for entry in &snapshot.frontends {
        let frontend = Frontend {
            backend: entry.backend.clone(),
            routes: entry
                .routes
                .iter()
                .map(|(name, rule)| (name.clone(), Route { rule: rule.clone() }))
                .collect(),
            entry_points: entry.entry_points.clone(),
            pass_host_header: parse_or(&entry.name, "passHostHeader", &entry.pass_host_header, true, parse_bool),
            basic_auth: entry.basic_auth.clone(),
            whitelist_source_range: entry.whitelist_source_range.clone(),
            priority: parse_or(&entry.name, "priority", &entry.priority, 0, |raw| raw.parse().ok()),
        };
        configuration.frontends.insert(entry.name.clone(), frontend);
    }

    for entry in &snapshot.tls {
        if entry.cert_file.is_empty() || entry.key_file.is_empty() {
            warn!(tls = %entry.name, "TLS configuration without certificate or key, skipping");
            continue;
        }
        configuration.tls.push(TlsConfiguration {
            entry_points: entry.entry_points.clone(),
            certificate: Certificate {
                cert_file: entry.cert_file.clone(),
                key_file: entry.key_file.clone(),
            },
        });
    }

    for frontend in configuration.drop_dangling_frontends() {
        warn!(frontend = %frontend, "Dropping frontend referencing an unknown backend");
    }
    configuration
}

fn render_backend(entry: &KvBackend) -> Backend {
    let servers = entry
        .servers
        .iter()
        .map(|server| {
            let weight = parse_or(&server.name, "weight", &server.weight, DEFAULT_WEIGHT, |raw| {
                raw.parse().ok()
            });
            (
                server.name.clone(),
                Server {
                    url: server.url.clone(),
                    weight,
                },
            )
        })
        .collect();

    let load_balancer = (!entry.lb_method.is_empty()).then(|| {
        let sticky = parse_or(&entry.name, "loadbalancer/sticky", &entry.lb_sticky, false, parse_bool);
        if !entry.lb_sticky.is_empty() {
            warn!(
                backend = %entry.name,
                "Deprecated key loadbalancer/sticky in use, use loadbalancer/stickiness"
            );
        }
        let stickiness = (!entry.lb_stickiness.is_empty() && entry.lb_stickiness != "false")
            .then(|| Stickiness {
                cookie_name: entry.cookie_name.clone(),
            });
        LoadBalancer {
            method: entry.lb_method.clone(),
            sticky,
            stickiness,
        }
    });

    let extractor = match entry.maxconn_extractor.as_str() {
        "" => DEFAULT_MAXCONN_EXTRACTOR,
        extractor => extractor,
    };

    Backend {
        servers,
        circuit_breaker: (!entry.circuit_breaker.is_empty()).then(|| CircuitBreaker {
            expression: entry.circuit_breaker.clone(),
        }),
        load_balancer,
        max_conn: max_conn(&entry.name, &entry.maxconn_amount, extractor),
        health_check: (!entry.healthcheck_path.is_empty()).then(|| HealthCheck {
            path: entry.healthcheck_path.clone(),
            interval: entry.healthcheck_interval.clone(),
        }),
    }
}

fn parse_or<T>(owner: &str, key: &str, raw: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
    if raw.is_empty() {
        return default;
    }
    match parse(raw.trim()) {
        Some(value) => value,
        None => {
            warn!(owner, key, value = raw, "Invalid value, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constraints::parse_constraints;
    use crate::sources::{MemoryKvStore, StoreBackend};

    fn reader(entries: &[(&str, &str)]) -> KeyTreeReader<MemoryKvStore> {
        let store = MemoryKvStore::new();
        for (key, value) in entries {
            store.put(format!("/traefik{}", key), *value);
        }
        KeyTreeReader::new(store, StoreBackend::Consul)
    }

    async fn render(entries: &[(&str, &str)], constraints: &[&str]) -> Option<Configuration> {
        let builder = KvTreeBuilder::new("/traefik/", parse_constraints(constraints).unwrap());
        builder.load(&reader(entries)).await.map(|snapshot| render_kv(&snapshot))
    }

    #[tokio::test]
    async fn test_full_tree() {
        let configuration = render(
            &[
                ("/backends/backend1/circuitbreaker/expression", "NetworkErrorRatio() > 0.5"),
                ("/backends/backend1/servers/server1/url", "http://172.17.0.2:80"),
                ("/backends/backend1/servers/server1/weight", "10"),
                ("/backends/backend1/servers/server2/url", "http://172.17.0.3:80"),
                ("/backends/backend1/loadbalancer/method", "drr"),
                ("/backends/backend1/loadbalancer/stickiness", "true"),
                ("/backends/backend1/loadbalancer/stickiness/cookiename", "tomate"),
                ("/backends/backend1/maxconn/amount", "10"),
                ("/backends/backend1/maxconn/extractorfunc", "request.host"),
                ("/backends/backend1/healthcheck/path", "/health"),
                ("/frontends/frontend1/backend", "backend1"),
                ("/frontends/frontend1/priority", "10"),
                ("/frontends/frontend1/passHostHeader", "false"),
                ("/frontends/frontend1/entrypoints", "http,https"),
                ("/frontends/frontend1/basicauth", "test:1234,test2:5678"),
                ("/frontends/frontend1/routes/test_1/rule", "Host:test.localhost"),
                ("/tlsconfiguration/foo/entrypoints", "https"),
                ("/tlsconfiguration/foo/certificate/certfile", "/certs/foo.crt"),
                ("/tlsconfiguration/foo/certificate/keyfile", "/certs/foo.key"),
            ],
            &[],
        )
        .await
        .unwrap();

        let backend = &configuration.backends["backend1"];
        assert_eq!(backend.servers["server1"].weight, 10);
        assert_eq!(backend.servers["server2"].weight, DEFAULT_WEIGHT);
        assert_eq!(backend.circuit_breaker.as_ref().unwrap().expression, "NetworkErrorRatio() > 0.5");
        let lb = backend.load_balancer.as_ref().unwrap();
        assert_eq!(lb.method, "drr");
        assert!(!lb.sticky);
        assert_eq!(lb.stickiness.as_ref().unwrap().cookie_name, "tomate");
        assert_eq!(backend.max_conn.as_ref().unwrap().amount, 10);
        assert_eq!(backend.health_check.as_ref().unwrap().interval, "30s");

        let frontend = &configuration.frontends["frontend1"];
        assert_eq!(frontend.backend, "backend1");
        assert_eq!(frontend.priority, 10);
        assert!(!frontend.pass_host_header);
        assert_eq!(frontend.entry_points, vec!["http", "https"]);
        assert_eq!(frontend.basic_auth, vec!["test:1234", "test2:5678"]);
        assert_eq!(frontend.routes["test_1"].rule, "Host:test.localhost");

        assert_eq!(configuration.tls.len(), 1);
        assert_eq!(configuration.tls[0].certificate.key_file, "/certs/foo.key");
    }

    #[tokio::test]
    async fn test_defaults_and_optional_blocks() {
        let configuration = render(
            &[
                ("/backends/b/servers/s/url", "http://10.0.0.1:80"),
                ("/backends/b/maxconn/amount", "5"),
                ("/frontends/f/backend", "b"),
            ],
            &[],
        )
        .await
        .unwrap();

        let backend = &configuration.backends["b"];
        assert!(backend.load_balancer.is_none());
        assert!(backend.circuit_breaker.is_none());
        assert!(backend.health_check.is_none());
        let max_conn = backend.max_conn.as_ref().unwrap();
        assert_eq!(max_conn.amount, 5);
        assert_eq!(max_conn.extractor_func, DEFAULT_MAXCONN_EXTRACTOR);

        let frontend = &configuration.frontends["f"];
        assert!(frontend.pass_host_header);
        assert_eq!(frontend.priority, 0);
        assert!(frontend.routes.is_empty());
    }

    #[test]
    fn test_max_conn_amount_alone_uses_default_extractor() {
        let snapshot = KvSnapshot {
            backends: vec![KvBackend {
                name: "b".to_string(),
                maxconn_amount: "5".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let max_conn = render_kv(&snapshot).backends["b"].max_conn.clone().unwrap();
        assert_eq!(max_conn.amount, 5);
        assert_eq!(max_conn.extractor_func, DEFAULT_MAXCONN_EXTRACTOR);

        let snapshot = KvSnapshot {
            backends: vec![KvBackend {
                name: "b".to_string(),
                maxconn_extractor: "client.ip".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(render_kv(&snapshot).backends["b"].max_conn.is_none());
    }

    #[tokio::test]
    async fn test_stickiness_false_is_disabled() {
        let configuration = render(
            &[
                ("/backends/b/servers/s/url", "http://10.0.0.1:80"),
                ("/backends/b/loadbalancer/method", "wrr"),
                ("/backends/b/loadbalancer/stickiness", "false"),
                ("/backends/b/loadbalancer/sticky", "true"),
            ],
            &[],
        )
        .await
        .unwrap();
        let lb = configuration.backends["b"].load_balancer.clone().unwrap();
        assert!(lb.sticky);
        assert!(lb.stickiness.is_none());
    }

    #[tokio::test]
    async fn test_servers_without_url_are_skipped() {
        let configuration = render(
            &[
                ("/backends/b/servers/s1/url", "http://10.0.0.1:80"),
                ("/backends/b/servers/s2/weight", "3"),
            ],
            &[],
        )
        .await
        .unwrap();
        let servers = &configuration.backends["b"].servers;
        assert_eq!(servers.len(), 1);
        assert!(servers.contains_key("s1"));
    }

    #[tokio::test]
    async fn test_dangling_frontend_dropped() {
        let configuration = render(
            &[
                ("/backends/b/servers/s/url", "http://10.0.0.1:80"),
                ("/frontends/ok/backend", "b"),
                ("/frontends/dangling/backend", "missing"),
            ],
            &[],
        )
        .await
        .unwrap();
        assert!(configuration.frontends.contains_key("ok"));
        assert!(!configuration.frontends.contains_key("dangling"));
        assert!(configuration.is_consistent());
    }

    #[tokio::test]
    async fn test_root_constraints_gate_whole_tree() {
        let entries = [
            ("/tags", "us-east-1"),
            ("/backends/b/servers/s/url", "http://10.0.0.1:80"),
        ];
        assert!(render(&entries, &["tag==us-east-*"]).await.is_some());
        assert!(render(&entries, &["tag!=us-east-*"]).await.is_none());
    }

    #[tokio::test]
    async fn test_server_constraints() {
        let configuration = render(
            &[
                ("/backends/b/servers/s1/url", "http://10.0.0.1:80"),
                ("/backends/b/servers/s1/tags", "canary"),
                ("/backends/b/servers/s2/url", "http://10.0.0.2:80"),
                ("/backends/b/servers/s2/tags", "stable"),
                ("/tags", "stable,canary"),
            ],
            &["tag!=canary"],
        )
        .await;
        // The root carries `canary` too, so the whole tree is excluded.
        assert!(configuration.is_none());

        let configuration = render(
            &[
                ("/backends/b/servers/s1/url", "http://10.0.0.1:80"),
                ("/backends/b/servers/s1/tags", "canary"),
                ("/backends/b/servers/s2/url", "http://10.0.0.2:80"),
                ("/backends/b/servers/s2/tags", "stable"),
            ],
            &["tag!=canary"],
        )
        .await
        .unwrap();
        let servers = &configuration.backends["b"].servers;
        assert_eq!(servers.keys().collect::<Vec<_>>(), vec!["s2"]);
    }

    #[tokio::test]
    async fn test_invalid_numbers_fall_back() {
        let configuration = render(
            &[
                ("/backends/b/servers/s/url", "http://10.0.0.1:80"),
                ("/backends/b/servers/s/weight", "heavy"),
                ("/frontends/f/backend", "b"),
                ("/frontends/f/priority", "high"),
            ],
            &[],
        )
        .await
        .unwrap();
        assert_eq!(configuration.backends["b"].servers["s"].weight, DEFAULT_WEIGHT);
        assert_eq!(configuration.frontends["f"].priority, 0);
    }

    #[tokio::test]
    async fn test_tls_without_key_skipped() {
        let configuration = render(
            &[("/tlsconfiguration/t/certificate/certfile", "/certs/t.crt")],
            &[],
        )
        .await
        .unwrap();
        assert!(configuration.tls.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_store_yields_empty_tree() {
        let reader = reader(&[("/backends/b/servers/s/url", "http://10.0.0.1:80")]);
        reader.store().set_unreachable(true);
        let snapshot = KvTreeBuilder::new("/traefik", Vec::new()).load(&reader).await.unwrap();
        assert!(snapshot.backends.is_empty());
    }
}
