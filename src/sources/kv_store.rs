//! KV store trait.

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// One key and its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    /// `/`-separated key.
    pub key: String,
    /// Raw value.
    pub value: String,
}

impl KvPair {
    /// Create a pair.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Kind of store behind a [`KvStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Consul KV.
    #[default]
    Consul,
    /// etcd (v2 key layout).
    Etcd,
    /// Zookeeper.
    Zookeeper,
    /// BoltDB.
    Boltdb,
}

impl StoreBackend {
    /// Name used as the provider name of published snapshots.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Consul => "consul",
            Self::Etcd => "etcd",
            Self::Zookeeper => "zookeeper",
            Self::Boltdb => "boltdb",
        }
    }

    /// Whether keys must be sent without a leading `/`.
    pub fn strips_leading_separator(self) -> bool {
        matches!(self, Self::Etcd)
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client for a hierarchical key/value store.
///
/// Implement this trait to plug a store into
/// [`KvProvider`](crate::provider::KvProvider).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read one key. `Ok(None)` means the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    async fn get(&self, key: &str) -> Result<Option<KvPair>, StoreError>;

    /// List the pairs below `prefix`.
    ///
    /// Implementations may return direct children only or the whole subtree.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>, StoreError>;

    /// Subscribe to changes below `prefix`.
    ///
    /// Every message carries the full subtree after a change. The channel
    /// closes when the subscription ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be opened.
    async fn watch_tree(&self, prefix: &str) -> Result<mpsc::Receiver<Vec<KvPair>>, StoreError>;

    /// Whether a key exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}
