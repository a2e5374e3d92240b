//! Pure pipeline stages: attribute lookup, filtering, change detection and
//! rendering.

mod attributes;
mod catalog;
mod change;
mod configuration;
mod constraints;
mod kv_tree;
mod model;
mod template;

pub use attributes::{
    AttributeResolver, DEFAULT_PREFIX, get_tag, has_tag, lookup_tag, parse_bool, split_list,
};
pub use catalog::{
    CatalogSnapshot, ConfigurationRenderer, DEFAULT_HEALTHCHECK_INTERVAL,
    DEFAULT_LOAD_BALANCER_METHOD, DEFAULT_MAXCONN_EXTRACTOR, DEFAULT_WEIGHT, FetchedService,
    ServiceSnapshotBuilder, backend_name, frontend_name, normalize, route_name, server_name,
};
pub use change::{ChangeDetector, ServiceView, changed, diff_keys};
pub use configuration::{
    Backend, Certificate, CircuitBreaker, ConfigMessage, Configuration, Frontend, HealthCheck,
    LoadBalancer, MaxConn, Route, Server, Stickiness, TlsConfiguration,
};
pub use constraints::{Constraint, first_failing, glob_match, parse_constraints};
pub use kv_tree::{KvBackend, KvFrontend, KvServer, KvSnapshot, KvTls, KvTreeBuilder, render_kv};
pub use model::{
    CatalogUpdate, RawServiceRecord, ServiceNameSet, ServiceUpdate, compare_nodes, sort_nodes,
};
pub use template::{DEFAULT_FRONTEND_RULE, Field, RuleContext, RuleTemplate, TemplateFunction};
