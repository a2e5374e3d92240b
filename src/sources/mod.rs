//! Clients for the external stores the providers read from.

mod catalog_client;
mod key_tree;
mod kv_store;
mod memory;

#[cfg(feature = "consul")]
mod consul;

pub use catalog_client::{CatalogClient, ServiceListing};
pub use key_tree::{CONNECTION_PROBE_KEY, KeyTreeReader, last_segment};
pub use kv_store::{KvPair, KvStore, StoreBackend};
pub use memory::{MemoryCatalog, MemoryKvStore};

#[cfg(feature = "consul")]
pub use consul::{ConsulCatalogClient, ConsulCatalogClientBuilder};
