//! Catalog worker: blocking service listings, then fetch, build and render.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Provider, WatchContext};
use crate::core::{
    AttributeResolver, ChangeDetector, ConfigurationRenderer, ServiceSnapshotBuilder,
    parse_constraints,
};
use crate::error::{ProviderError, Result};
use crate::settings::CatalogSettings;
use crate::sources::{CatalogClient, ServiceListing};

/// Watches a service catalog and publishes one configuration per change.
///
/// The change detector outlives reconnects, so a reconnect that finds the
/// catalog as it was does not republish.
pub struct CatalogProvider<C> {
    name: String,
    client: C,
    snapshot_builder: ServiceSnapshotBuilder,
    renderer: ConfigurationRenderer,
    wait_time: Duration,
    detector: ChangeDetector,
}

impl<C: CatalogClient> CatalogProvider<C> {
    /// Create a worker over `client`.
    pub fn new(
        client: C,
        snapshot_builder: ServiceSnapshotBuilder,
        renderer: ConfigurationRenderer,
    ) -> Self {
        Self {
            name: CatalogSettings::PROVIDER_NAME.to_string(),
            client,
            snapshot_builder,
            renderer,
            wait_time: Duration::from_millis(CatalogSettings::default().wait_time_ms),
            detector: ChangeDetector::new(),
        }
    }

    /// Create a worker configured by `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] if a constraint does not parse.
    pub fn from_settings(client: C, settings: &CatalogSettings) -> Result<Self> {
        let resolver = AttributeResolver::new(settings.prefix.clone());
        let constraints = parse_constraints(&settings.constraints)?;
        let snapshot_builder =
            ServiceSnapshotBuilder::new(resolver.clone(), constraints, settings.exposed_by_default);
        let renderer =
            ConfigurationRenderer::new(resolver, settings.domain.clone(), settings.frontend_rule.clone());
        Ok(Self::new(client, snapshot_builder, renderer).with_wait_time(settings.wait_time()))
    }

    /// Name attached to published messages.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Blocking query wait.
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// The catalog client.
    pub fn client(&self) -> &C {
        &self.client
    }

    async fn rebuild(&mut self, listing: &ServiceListing, ctx: &WatchContext) -> Result<()> {
        let cancel = ctx.cancel_token().clone();
        let snapshot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Stopped),
            snapshot = self.snapshot_builder.fetch(&self.client, &listing.services) => snapshot?,
        };

        let views = snapshot.views();
        if !self.detector.is_changed(&views) {
            debug!(provider = %self.name, index = listing.index, "Catalog unchanged");
            return Ok(());
        }

        let updates = self.snapshot_builder.build(&snapshot);
        let configuration = self.renderer.render(&updates);
        ctx.publish(configuration).await?;
        self.detector.commit(views);
        Ok(())
    }
}

#[async_trait]
impl<C: CatalogClient> Provider for CatalogProvider<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn watch(&mut self, ctx: &mut WatchContext) -> Result<()> {
        let cancel = ctx.cancel_token().clone();
        let mut wait_index = 0u64;
        let mut connected = false;

        loop {
            let listing = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                listing = self.client.list_services(wait_index, self.wait_time) => {
                    listing.map_err(ProviderError::Connection)?
                }
            };

            if !connected {
                info!(provider = %self.name, index = listing.index, "Connected to catalog");
                ctx.connected();
                connected = true;
            }

            if wait_index != 0 && listing.index == wait_index {
                debug!(provider = %self.name, index = wait_index, "Blocking query timed out");
                continue;
            }
            if listing.index < wait_index {
                debug!(
                    provider = %self.name,
                    previous = wait_index,
                    index = listing.index,
                    "Catalog index went backwards, resetting"
                );
                wait_index = 0;
                continue;
            }
            wait_index = listing.index;

            let timer = ctx.start_rebuild();
            let result = self.rebuild(&listing, ctx).await;
            ctx.finish_rebuild(timer, result.is_ok());
            result?;
            ctx.healthy();
        }
    }
}
