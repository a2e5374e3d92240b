//! KV-tree worker: probe, load, publish, then rebuild on every tree change.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Provider, WatchContext};
use crate::core::{KvTreeBuilder, parse_constraints, render_kv};
use crate::error::{ProviderError, Result};
use crate::settings::KvSettings;
use crate::sources::{KeyTreeReader, KvStore, StoreBackend};

/// Watches a key tree and publishes one configuration per change.
///
/// Before every load the store is probed; a failed probe is a connection
/// error, so an outage never publishes an empty configuration.
pub struct KvProvider<S> {
    name: String,
    reader: KeyTreeReader<S>,
    builder: KvTreeBuilder,
    watch: bool,
}

impl<S: KvStore> KvProvider<S> {
    /// Create a worker reading the tree below `root`.
    pub fn new(store: S, backend: StoreBackend, builder: KvTreeBuilder) -> Self {
        Self {
            name: backend.as_str().to_string(),
            reader: KeyTreeReader::new(store, backend),
            builder,
            watch: true,
        }
    }

    /// Create a worker configured by `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] if a constraint does not parse.
    pub fn from_settings(store: S, settings: &KvSettings) -> Result<Self> {
        let constraints = parse_constraints(&settings.constraints)?;
        let builder = KvTreeBuilder::new(settings.prefix.clone(), constraints);
        Ok(Self::new(store, settings.backend, builder).with_watch(settings.watch))
    }

    /// Keep watching after the first load; when off the worker finishes
    /// after publishing once.
    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Name attached to published messages.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The key reader.
    pub fn reader(&self) -> &KeyTreeReader<S> {
        &self.reader
    }

    async fn probe(&self) -> Result<()> {
        self.reader
            .check_connection(self.builder.root())
            .await
            .map_err(ProviderError::Connection)
    }

    async fn rebuild(&self, ctx: &WatchContext) -> Result<()> {
        let timer = ctx.start_rebuild();
        let result = self.load_and_publish(ctx).await;
        ctx.finish_rebuild(timer, result.is_ok());
        result
    }

    async fn load_and_publish(&self, ctx: &WatchContext) -> Result<()> {
        self.probe().await?;

        let cancel = ctx.cancel_token().clone();
        let snapshot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Stopped),
            snapshot = self.builder.load(&self.reader) => snapshot,
        };

        let Some(snapshot) = snapshot else {
            debug!(provider = %self.name, root = %self.builder.root(), "Key tree excluded, nothing to publish");
            return Ok(());
        };
        ctx.publish(render_kv(&snapshot)).await?;
        Ok(())
    }
}

#[async_trait]
impl<S: KvStore> Provider for KvProvider<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn watch(&mut self, ctx: &mut WatchContext) -> Result<()> {
        let cancel = ctx.cancel_token().clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            probed = self.probe() => probed?,
        }
        info!(provider = %self.name, root = %self.builder.root(), "Connected to store");
        ctx.connected();

        self.rebuild(ctx).await?;
        ctx.healthy();
        if !self.watch {
            info!(provider = %self.name, "Watch disabled, loaded once");
            return Ok(());
        }

        let root = self.reader.store_key(self.builder.root()).to_string();
        let mut events = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            events = self.reader.store().watch_tree(&root) => {
                events.map_err(ProviderError::Connection)?
            }
        };

        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                batch = events.recv() => batch,
            };
            match batch {
                Some(pairs) => {
                    debug!(provider = %self.name, keys = pairs.len(), "Key tree changed");
                    self.rebuild(ctx).await?;
                    ctx.healthy();
                }
                None => return Err(ProviderError::WatchClosed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConfigMessage;
    use crate::provider::{BackoffPolicy, ExponentialBackoff, Publisher};
    use crate::sources::MemoryKvStore;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn seeded() -> MemoryKvStore {
        let store = MemoryKvStore::new();
        store.put("/traefik/backends/b/servers/s/url", "http://10.0.0.1:80");
        store.put("/traefik/frontends/f/backend", "b");
        store
    }

    fn context() -> (WatchContext, mpsc::Receiver<ConfigMessage>) {
        let (tx, rx) = mpsc::channel(8);
        let (ctx, _state) = WatchContext::new(
            Publisher::new("consul", tx),
            CancellationToken::new(),
            ExponentialBackoff::new(BackoffPolicy::default()),
        );
        (ctx, rx)
    }

    #[tokio::test]
    async fn test_one_shot_load() {
        let settings = KvSettings {
            watch: false,
            ..Default::default()
        };
        let mut provider = KvProvider::from_settings(seeded(), &settings).unwrap();
        let (mut ctx, mut rx) = context();

        provider.watch(&mut ctx).await.unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.provider_name, "consul");
        assert!(message.configuration.frontends.contains_key("f"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_probe_failure_publishes_nothing() {
        let store = seeded();
        store.set_unreachable(true);
        let mut provider = KvProvider::from_settings(store, &KvSettings::default()).unwrap();
        let (mut ctx, mut rx) = context();

        let result = provider.watch(&mut ctx).await;
        assert!(matches!(result, Err(ProviderError::Connection(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_watch_is_error() {
        let store = seeded();
        let mut provider = KvProvider::from_settings(store.clone(), &KvSettings::default()).unwrap();
        let (mut ctx, mut rx) = context();

        let worker = tokio::spawn(async move { provider.watch(&mut ctx).await });
        rx.recv().await.unwrap();

        // The subscription may open after the first publication.
        while !worker.is_finished() {
            store.close_watches();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let result = worker.await.unwrap();
        assert!(matches!(result, Err(ProviderError::WatchClosed)));
    }

    #[tokio::test]
    async fn test_change_republishes() {
        let store = seeded();
        let mut provider = KvProvider::from_settings(store.clone(), &KvSettings::default()).unwrap();
        let (mut ctx, mut rx) = context();
        let cancel = ctx.cancel_token().clone();

        let worker = tokio::spawn(async move { provider.watch(&mut ctx).await });
        let first = rx.recv().await.unwrap();
        assert_eq!(first.configuration.backends["b"].servers.len(), 1);

        store.put("/traefik/backends/b/servers/s2/url", "http://10.0.0.2:80");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.configuration.backends["b"].servers.len(), 2);

        cancel.cancel();
        assert!(worker.await.unwrap().is_ok());
    }
}
