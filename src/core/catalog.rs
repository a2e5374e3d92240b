//! Catalog pipeline: fetch service instances, filter and group them, and
//! render the routing configuration.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::core::attributes::AttributeResolver;
use crate::core::change::ServiceView;
use crate::core::configuration::{
    Backend, CircuitBreaker, Configuration, Frontend, HealthCheck, LoadBalancer, MaxConn, Route,
    Server, Stickiness,
};
use crate::core::constraints::{Constraint, first_failing};
use crate::core::model::{
    CatalogUpdate, RawServiceRecord, ServiceNameSet, ServiceUpdate, compare_nodes, sort_nodes,
};
use crate::core::template::{RuleContext, RuleTemplate};
use crate::error::{ProviderError, Result};
use crate::sources::CatalogClient;

/// Load balancer method used when none is configured.
pub const DEFAULT_LOAD_BALANCER_METHOD: &str = "wrr";
/// Extractor used when only a connection limit amount is configured.
pub const DEFAULT_MAXCONN_EXTRACTOR: &str = "request.host";
/// Health check interval used when only a path is configured.
pub const DEFAULT_HEALTHCHECK_INTERVAL: &str = "30s";
/// Server weight used when none is configured.
pub const DEFAULT_WEIGHT: i32 = 1;

/// Raw data of one service as fetched during a build cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedService {
    /// Service name with its catalog casing.
    pub name: String,
    /// Tags reported by the service listing.
    pub catalog_tags: Vec<String>,
    /// Healthy instances, unfiltered.
    pub nodes: Vec<RawServiceRecord>,
}

/// Everything fetched during one build cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    /// One entry per distinct service name.
    pub services: Vec<FetchedService>,
}

impl CatalogSnapshot {
    /// Views compared by the change detector.
    pub fn views(&self) -> BTreeMap<String, ServiceView> {
        self.services
            .iter()
            .map(|service| {
                let mut nodes = service.nodes.clone();
                sort_nodes(&mut nodes);
                let view = ServiceView {
                    name: service.name.clone(),
                    tags: service.catalog_tags.clone(),
                    nodes: nodes.iter().map(node_view).collect(),
                };
                (service.name.clone(), view)
            })
            .collect()
    }
}

/// `address:port` followed by the sorted instance tags.
fn node_view(node: &RawServiceRecord) -> String {
    let tags: BTreeSet<&str> = node.tags.iter().map(String::as_str).collect();
    let tags: Vec<&str> = tags.into_iter().collect();
    format!("{} [{}]", node.endpoint(), tags.join(","))
}

/// Turns catalog data into per-service updates.
#[derive(Debug, Clone)]
pub struct ServiceSnapshotBuilder {
    resolver: AttributeResolver,
    constraints: Vec<Constraint>,
    exposed_by_default: bool,
}

impl ServiceSnapshotBuilder {
    /// Create a builder.
    pub fn new(
        resolver: AttributeResolver,
        constraints: Vec<Constraint>,
        exposed_by_default: bool,
    ) -> Self {
        Self {
            resolver,
            constraints,
            exposed_by_default,
        }
    }

    /// Fetch the healthy instances of every listed service.
    ///
    /// Names are deduplicated case-insensitively so no service is queried
    /// twice, and names containing a space are skipped.
    ///
    /// # Errors
    ///
    /// Fails with [`ProviderError::Fetch`] as soon as one service cannot be
    /// fetched; nothing from the partial cycle is returned.
    pub async fn fetch<C>(
        &self,
        client: &C,
        index: &BTreeMap<String, Vec<String>>,
    ) -> Result<CatalogSnapshot>
    where
        C: CatalogClient + ?Sized,
    {
        let mut names = ServiceNameSet::new();
        for name in index.keys() {
            if name.contains(' ') {
                debug!(service = %name, "Skipping service with a space in its name");
                continue;
            }
            names.insert(name);
        }

        let mut services = Vec::with_capacity(names.len());
        for name in names.iter() {
            debug!(service = name, "Fetching service");
            let nodes = client
                .healthy_service_nodes(name)
                .await
                .map_err(|source| ProviderError::Fetch {
                    service: name.to_string(),
                    source,
                })?;
            services.push(FetchedService {
                name: name.to_string(),
                catalog_tags: index.get(name).cloned().unwrap_or_default(),
                nodes,
            });
        }

        Ok(CatalogSnapshot { services })
    }

    /// Filter, group and sort the fetched instances.
    ///
    /// Services left without eligible instances are omitted.
    pub fn build(&self, snapshot: &CatalogSnapshot) -> Vec<CatalogUpdate> {
        let mut updates = Vec::new();
        for service in &snapshot.services {
            let mut nodes: Vec<RawServiceRecord> = service
                .nodes
                .iter()
                .filter(|node| self.is_eligible(&service.name, node))
                .cloned()
                .collect();
            if nodes.is_empty() {
                continue;
            }
            sort_nodes(&mut nodes);

            let attributes: BTreeSet<&String> = nodes.iter().flat_map(|node| &node.tags).collect();
            updates.push(CatalogUpdate {
                service: ServiceUpdate {
                    service_name: service.name.clone(),
                    attributes: attributes.into_iter().cloned().collect(),
                },
                nodes,
            });
        }
        updates
    }

    /// Values of every `<prefix>.tags=a,b` tag.
    pub fn constraint_tags(&self, tags: &[String]) -> Vec<String> {
        let key = self.resolver.prefixed_name("tags=").to_lowercase();
        tags.iter()
            .filter_map(|tag| {
                let head = tag.get(..key.len())?;
                head.eq_ignore_ascii_case(&key).then(|| &tag[key.len()..])
            })
            .flat_map(|values| values.split(','))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect()
    }

    fn is_eligible(&self, service: &str, node: &RawServiceRecord) -> bool {
        if !self.resolver.get_bool(&node.tags, "enable", self.exposed_by_default) {
            debug!(service, node = %node.node_name, "Filtering disabled service instance");
            return false;
        }

        let tags = self.constraint_tags(&node.tags);
        if let Some(failing) = first_failing(&self.constraints, &tags) {
            debug!(service, node = %node.node_name, constraint = %failing, "Service instance pruned by constraint");
            return false;
        }
        true
    }
}

/// Renders catalog updates into a routing configuration.
#[derive(Debug, Clone)]
pub struct ConfigurationRenderer {
    resolver: AttributeResolver,
    domain: String,
    frontend_rule: String,
}

impl ConfigurationRenderer {
    /// Create a renderer with the default frontend rule template.
    pub fn new(
        resolver: AttributeResolver,
        domain: impl Into<String>,
        frontend_rule: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            domain: domain.into(),
            frontend_rule: frontend_rule.into(),
        }
    }

    /// Render the configuration.
    ///
    /// The result does not depend on the order of `updates` or of their
    /// nodes. Frontends without a usable rule or without a backend are left out.
    pub fn render(&self, updates: &[CatalogUpdate]) -> Configuration {
        let mut configuration = Configuration::default();

        let mut nodes: Vec<(String, &RawServiceRecord)> = updates
            .iter()
            .flat_map(|update| {
                let backend = backend_name(&update.service.service_name);
                update.nodes.iter().map(move |node| (backend.clone(), node))
            })
            .collect();
        nodes.sort_by(|(a_backend, a), (b_backend, b)| {
            compare_nodes(a, b).then_with(|| a_backend.cmp(b_backend))
        });

        for (index, (backend, node)) in nodes.into_iter().enumerate() {
            let protocol = self.resolver.get(&node.tags, "protocol", "http");
            let server = Server {
                url: format!("{}://{}:{}", protocol, node.address(), node.port),
                weight: self.resolver.get_int(&node.tags, "backend.weight", DEFAULT_WEIGHT),
            };
            configuration
                .backends
                .entry(backend)
                .or_default()
                .servers
                .insert(server_name(node, index), server);
        }

        for update in updates {
            let name = &update.service.service_name;
            let attributes = &update.service.attributes;

            if let Some(backend) = configuration.backends.get_mut(&backend_name(name)) {
                self.apply_backend_policy(name, attributes, backend);
            }

            let rule = self.frontend_rule(update);
            if rule.is_empty() {
                warn!(service = %name, "No usable frontend rule, skipping frontend");
                continue;
            }
            configuration
                .frontends
                .insert(frontend_name(name), self.frontend(name, attributes, rule));
        }

        for frontend in configuration.drop_dangling_frontends() {
            debug!(frontend = %frontend, "Dropping frontend without backend");
        }
        configuration
    }

    /// Evaluate the service's rule template, or the default one.
    ///
    /// Returns an empty string when the template is invalid.
    pub fn frontend_rule(&self, update: &CatalogUpdate) -> String {
        let attributes = &update.service.attributes;
        let custom = self.resolver.get(attributes, "frontend.rule", "");
        let source = if custom.is_empty() {
            self.frontend_rule.as_str()
        } else {
            custom.as_str()
        };

        match RuleTemplate::parse(source) {
            Ok(template) => template.render(&RuleContext {
                service_name: &update.service.service_name,
                domain: &self.domain,
                attributes,
                resolver: &self.resolver,
            }),
            Err(err) => {
                warn!(service = %update.service.service_name, template = source, error = %err, "Invalid frontend rule template");
                String::new()
            }
        }
    }

    fn apply_backend_policy(&self, service: &str, attributes: &[String], backend: &mut Backend) {
        let r = &self.resolver;

        let sticky = r.get_bool(attributes, "backend.loadbalancer.sticky", false);
        if r.has(attributes, "backend.loadbalancer.sticky") {
            warn!(
                service,
                attribute = %r.prefixed_name("backend.loadbalancer.sticky"),
                replacement = %r.prefixed_name("backend.loadbalancer.stickiness"),
                "Deprecated attribute in use"
            );
        }
        let stickiness = (r.get_bool(attributes, "backend.loadbalancer.stickiness", false) || sticky)
            .then(|| Stickiness {
                cookie_name: r.get(attributes, "backend.loadbalancer.stickiness.cookieName", ""),
            });
        backend.load_balancer = Some(LoadBalancer {
            method: r.get(attributes, "backend.loadbalancer", DEFAULT_LOAD_BALANCER_METHOD),
            sticky,
            stickiness,
        });

        let expression = r.get(attributes, "backend.circuitbreaker", "");
        if !expression.is_empty() {
            backend.circuit_breaker = Some(CircuitBreaker { expression });
        }

        backend.max_conn = max_conn(
            service,
            &r.get(attributes, "backend.maxconn.amount", ""),
            &r.get(attributes, "backend.maxconn.extractorfunc", DEFAULT_MAXCONN_EXTRACTOR),
        );

        let path = r.get(attributes, "backend.healthcheck.path", "");
        if !path.is_empty() {
            backend.health_check = Some(HealthCheck {
                path,
                interval: r.get(attributes, "backend.healthcheck.interval", DEFAULT_HEALTHCHECK_INTERVAL),
            });
        }
    }

    fn frontend(&self, service: &str, attributes: &[String], rule: String) -> Frontend {
        let r = &self.resolver;
        Frontend {
            backend: backend_name(service),
            routes: BTreeMap::from([(route_name(service), Route { rule })]),
            entry_points: r.get_slice(attributes, "frontend.entryPoints").unwrap_or_default(),
            pass_host_header: r.get_bool(attributes, "frontend.passHostHeader", true),
            basic_auth: r.get_slice(attributes, "frontend.auth.basic").unwrap_or_default(),
            whitelist_source_range: r
                .get_slice(attributes, "frontend.whitelistSourceRange")
                .unwrap_or_default(),
            priority: r.get_int(attributes, "frontend.priority", 0),
        }
    }
}

/// Connection limit block, present only when both parts resolve.
pub(crate) fn max_conn(owner: &str, amount: &str, extractor: &str) -> Option<MaxConn> {
    if amount.is_empty() || extractor.is_empty() {
        return None;
    }
    match amount.trim().parse::<i64>() {
        Ok(amount) => Some(MaxConn {
            amount,
            extractor_func: extractor.to_string(),
        }),
        Err(_) => {
            warn!(owner, amount, "Invalid connection limit amount, ignoring limit");
            None
        }
    }
}

/// Backend key of a service.
pub fn backend_name(service: &str) -> String {
    format!("backend-{}", service)
}

/// Frontend key of a service.
pub fn frontend_name(service: &str) -> String {
    format!("frontend-{}", service)
}

/// Route key of a service's frontend.
pub fn route_name(service: &str) -> String {
    format!("route-host-{}", service)
}

/// Server key of an instance at `index` in the sorted node list.
///
/// `lowercase(service)--address--port[--normalized tag]*--index`, with `.`
/// and `=` replaced by `-`.
pub fn server_name(node: &RawServiceRecord, index: usize) -> String {
    let mut name = format!(
        "{}--{}--{}",
        node.service_name.to_lowercase(),
        node.address(),
        node.port
    );
    for tag in &node.tags {
        name.push_str("--");
        name.push_str(&normalize(tag));
    }
    let name = name.replace(['.', '='], "-");
    format!("{}--{}", name, index)
}

/// Join the alphanumeric runs of `value` with `-`.
pub fn normalize(value: &str) -> String {
    value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
