//! Catalog client trait.

use crate::core::RawServiceRecord;
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Result of one service listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceListing {
    /// Service names and their catalog tags.
    pub services: BTreeMap<String, Vec<String>>,
    /// Catalog index this listing reflects.
    pub index: u64,
}

/// Client for a service catalog with blocking queries.
///
/// Implement this trait to plug a catalog backend into
/// [`CatalogProvider`](crate::provider::CatalogProvider).
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// List services, blocking until the catalog index moves past
    /// `wait_index` or `wait_time` elapses.
    ///
    /// A listing returned because the wait elapsed carries an index equal to
    /// `wait_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be queried.
    async fn list_services(
        &self,
        wait_index: u64,
        wait_time: Duration,
    ) -> Result<ServiceListing, StoreError>;

    /// Instances of `service` whose health checks pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be queried.
    async fn healthy_service_nodes(&self, service: &str)
    -> Result<Vec<RawServiceRecord>, StoreError>;
}
