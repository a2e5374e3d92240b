//! Runs any number of workers against one output channel.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{BackoffPolicy, ExponentialBackoff, Provider, ProviderState, Publisher, WatchContext, run_provider};
use crate::core::{ConfigMessage, Configuration};
use crate::error::{ProviderError, Result};
use crate::settings::ProviderSettings;

#[cfg(feature = "metrics")]
use crate::metrics::ProviderMetrics;

/// Builder for a set of workers sharing one output channel.
///
/// Each worker runs on its own task with its own backoff state. Messages
/// from one worker arrive in publication order; messages from different
/// workers interleave freely.
///
/// # Examples
///
/// ```rust
/// use routesync::core::RawServiceRecord;
/// use routesync::provider::{CatalogProvider, ConfigSync};
/// use routesync::settings::CatalogSettings;
/// use routesync::sources::MemoryCatalog;
///
/// # async fn example() -> routesync::error::Result<()> {
/// let catalog = MemoryCatalog::new();
/// catalog.register(RawServiceRecord::new("web", "node-1", "10.0.0.1", 80));
///
/// let provider = CatalogProvider::from_settings(catalog, &CatalogSettings::default())?;
/// let (handle, mut updates) = ConfigSync::new().with_provider(provider).start();
///
/// let message = updates.recv().await.unwrap();
/// assert_eq!(message.provider_name, "consul_catalog");
/// handle.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConfigSync {
    channel_capacity: usize,
    backoff: BackoffPolicy,
    providers: Vec<Box<dyn Provider>>,
    cancel: CancellationToken,
    #[cfg(feature = "metrics")]
    meter: Option<opentelemetry::metrics::Meter>,
}

impl ConfigSync {
    /// Create an empty set with default channel capacity and backoff.
    pub fn new() -> Self {
        Self {
            channel_capacity: ProviderSettings::default().channel_capacity,
            backoff: BackoffPolicy::default(),
            providers: Vec::new(),
            cancel: CancellationToken::new(),
            #[cfg(feature = "metrics")]
            meter: None,
        }
    }

    /// Create a set from settings.
    ///
    /// With the `consul` feature, a configured `catalog` section adds a
    /// Consul catalog worker. KV workers need a store client and are added
    /// with [`with_provider`](Self::with_provider).
    ///
    /// # Errors
    ///
    /// Returns an error if a worker cannot be built from its section.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        #[allow(unused_mut)]
        let mut sync = Self::new()
            .with_channel_capacity(settings.channel_capacity)
            .with_backoff(settings.backoff.policy());

        #[cfg(feature = "consul")]
        if let Some(catalog) = &settings.catalog {
            let mut client = crate::sources::ConsulCatalogClient::builder()
                .with_endpoint(catalog.endpoint_url());
            if let Some(token) = &catalog.token {
                client = client.with_token(token.clone());
            }
            if let Some(datacenter) = &catalog.datacenter {
                client = client.with_datacenter(datacenter.clone());
            }
            if let Some(tls) = &catalog.tls {
                if let Some(ca_file) = &tls.ca_file {
                    client = client.with_ca_file(ca_file.clone());
                }
                client = client.with_insecure_skip_verify(tls.insecure_skip_verify);
            }
            let client = client.build().map_err(ProviderError::Connection)?;
            sync = sync.with_provider(super::CatalogProvider::from_settings(client, catalog)?);
        }

        Ok(sync)
    }

    /// Capacity of the output channel; senders wait when it is full.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Backoff policy of every worker.
    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = policy;
        self
    }

    /// Add a worker.
    pub fn with_provider(mut self, provider: impl Provider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Stop the workers when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Record worker metrics with `meter`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, meter: opentelemetry::metrics::Meter) -> Self {
        self.meter = Some(meter);
        self
    }

    /// Spawn every worker on the current runtime.
    ///
    /// The receiver yields `None` once every worker has finished.
    pub fn start(self) -> (ConfigSyncHandle, mpsc::Receiver<ConfigMessage>) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let mut workers = Vec::with_capacity(self.providers.len());

        for mut provider in self.providers {
            let name = provider.name().to_string();
            let publisher = Publisher::new(name.clone(), tx.clone());
            let latest = publisher.latest();
            let (ctx, state) = WatchContext::new(
                publisher,
                self.cancel.child_token(),
                ExponentialBackoff::new(self.backoff),
            );
            #[cfg(feature = "metrics")]
            let ctx = match &self.meter {
                Some(meter) => ctx.with_metrics(ProviderMetrics::new(meter.clone(), name.clone())),
                None => ctx,
            };

            info!(provider = %name, "Starting provider");
            let task = tokio::spawn(async move {
                let mut ctx = ctx;
                run_provider(provider.as_mut(), &mut ctx).await
            });
            workers.push(Worker {
                name,
                latest,
                state,
                task,
            });
        }

        let handle = ConfigSyncHandle {
            workers,
            cancel: self.cancel,
        };
        (handle, rx)
    }
}

impl Default for ConfigSync {
    fn default() -> Self {
        Self::new()
    }
}

struct Worker {
    name: String,
    latest: Arc<ArcSwapOption<Configuration>>,
    state: watch::Receiver<ProviderState>,
    task: JoinHandle<Result<()>>,
}

/// Handle on running workers.
pub struct ConfigSyncHandle {
    workers: Vec<Worker>,
    cancel: CancellationToken,
}

impl ConfigSyncHandle {
    /// Names of the workers, in start order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.workers.iter().map(|worker| worker.name.as_str()).collect()
    }

    /// Last configuration published by the worker `name`.
    pub fn latest(&self, name: &str) -> Option<Arc<Configuration>> {
        self.worker(name)?.latest.load_full()
    }

    /// Current state of the worker `name`.
    pub fn state(&self, name: &str) -> Option<ProviderState> {
        Some(*self.worker(name)?.state.borrow())
    }

    /// Current state of every worker.
    pub fn states(&self) -> Vec<(String, ProviderState)> {
        self.workers
            .iter()
            .map(|worker| (worker.name.clone(), *worker.state.borrow()))
            .collect()
    }

    /// A receiver following the state of the worker `name`.
    pub fn subscribe_state(&self, name: &str) -> Option<watch::Receiver<ProviderState>> {
        Some(self.worker(name)?.state.clone())
    }

    /// The token stopping every worker.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop every worker and wait for them to finish.
    ///
    /// # Errors
    ///
    /// Returns the first error a worker ended with.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for every worker to finish on its own.
    ///
    /// # Errors
    ///
    /// Returns the first error a worker ended with.
    pub async fn join(self) -> Result<()> {
        let mut first_error = None;
        for worker in self.workers {
            let outcome = match worker.task.await {
                Ok(result) => result,
                Err(join_error) => {
                    error!(provider = %worker.name, error = %join_error, "Provider task failed");
                    Err(ProviderError::Stopped)
                }
            };
            if let Err(err) = outcome {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn worker(&self, name: &str) -> Option<&Worker> {
        self.workers.iter().find(|worker| worker.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RawServiceRecord;
    use crate::provider::{CatalogProvider, KvProvider};
    use crate::settings::{CatalogSettings, KvSettings};
    use crate::sources::{MemoryCatalog, MemoryKvStore};
    use std::time::Duration;

    #[tokio::test]
    async fn test_workers_share_channel() {
        let catalog = MemoryCatalog::new();
        catalog.register(RawServiceRecord::new("web", "n1", "10.0.0.1", 80));
        let store = MemoryKvStore::new();
        store.put("/traefik/backends/b/servers/s/url", "http://10.0.0.2:80");

        let (handle, mut rx) = ConfigSync::new()
            .with_provider(
                CatalogProvider::from_settings(catalog, &CatalogSettings::default())
                    .unwrap()
                    .with_wait_time(Duration::from_millis(50)),
            )
            .with_provider(KvProvider::from_settings(store, &KvSettings::default()).unwrap())
            .start();

        let mut names = vec![
            rx.recv().await.unwrap().provider_name,
            rx.recv().await.unwrap().provider_name,
        ];
        names.sort();
        assert_eq!(names, vec!["consul", "consul_catalog"]);

        assert!(handle.latest("consul").is_some());
        assert!(handle.latest("missing").is_none());
        assert_eq!(handle.provider_names(), vec!["consul_catalog", "consul"]);

        handle.shutdown().await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_one_shot_worker_finishes() {
        let store = MemoryKvStore::new();
        store.put("/traefik/backends/b/servers/s/url", "http://10.0.0.2:80");
        let settings = KvSettings {
            watch: false,
            ..Default::default()
        };

        let (handle, mut rx) = ConfigSync::new()
            .with_provider(KvProvider::from_settings(store, &settings).unwrap())
            .start();

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
        assert_eq!(handle.state("consul"), Some(ProviderState::Stopped));
        handle.join().await.unwrap();
    }

    #[test]
    fn test_from_settings_without_sections() {
        let sync = ConfigSync::from_settings(&ProviderSettings::default()).unwrap();
        assert!(sync.providers.is_empty());
        assert_eq!(sync.channel_capacity, 16);
    }
}
