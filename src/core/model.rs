//! Intermediate model shared by the catalog pipeline stages.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One backend instance as reported by the catalog.
///
/// Recreated on every fetch and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawServiceRecord {
    /// Catalog service name.
    pub service_name: String,
    /// Node identity (the catalog node name).
    pub node_name: String,
    /// Address of the node running the instance.
    pub node_address: String,
    /// Address the service registered with; overrides `node_address` when set.
    #[serde(default)]
    pub service_address: String,
    /// Port the instance listens on.
    pub port: u16,
    /// Raw tags of this instance.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RawServiceRecord {
    /// Build a record whose service address is unset.
    pub fn new(
        service_name: impl Into<String>,
        node_name: impl Into<String>,
        node_address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            node_name: node_name.into(),
            node_address: node_address.into(),
            service_address: String::new(),
            port,
            tags: Vec::new(),
        }
    }

    /// Set the service address.
    pub fn with_service_address(mut self, address: impl Into<String>) -> Self {
        self.service_address = address.into();
        self
    }

    /// Set the tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// The address traffic should be sent to.
    pub fn address(&self) -> &str {
        if self.service_address.is_empty() {
            &self.node_address
        } else {
            &self.service_address
        }
    }

    /// `address:port` of the instance.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address(), self.port)
    }
}

/// Total order over records: service name, resolved address, node address, port.
///
/// Two fetches with identical membership sort identically, so the derived
/// configuration can be compared structurally.
pub fn compare_nodes(a: &RawServiceRecord, b: &RawServiceRecord) -> Ordering {
    a.service_name
        .cmp(&b.service_name)
        .then_with(|| a.address().cmp(b.address()))
        .then_with(|| a.node_address.cmp(&b.node_address))
        .then_with(|| a.port.cmp(&b.port))
        .then_with(|| a.node_name.cmp(&b.node_name))
        .then_with(|| a.tags.cmp(&b.tags))
}

/// Sort records with [`compare_nodes`].
pub fn sort_nodes(nodes: &mut [RawServiceRecord]) {
    nodes.sort_by(compare_nodes);
}

/// A logical service and the merged tags of its eligible instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUpdate {
    /// Service name with its catalog casing.
    pub service_name: String,
    /// Tags used to resolve service-level attributes.
    pub attributes: Vec<String>,
}

/// One service paired with its filtered, sorted instances for one build cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogUpdate {
    /// The service.
    pub service: ServiceUpdate,
    /// Eligible instances, sorted with [`compare_nodes`].
    pub nodes: Vec<RawServiceRecord>,
}

/// Ordered set of service names keyed by their lower-cased form.
///
/// The first spelling inserted for a given folded name is retained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceNameSet {
    names: BTreeMap<String, String>,
}

impl ServiceNameSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a name. Returns `false` if a case-insensitively equal name is already present.
    pub fn insert(&mut self, name: &str) -> bool {
        let folded = name.to_lowercase();
        if self.names.contains_key(&folded) {
            return false;
        }
        self.names.insert(folded, name.to_string());
        true
    }

    /// Whether a case-insensitively equal name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(&name.to_lowercase())
    }

    /// Retained original spellings in folded-name order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.values().map(String::as_str)
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
