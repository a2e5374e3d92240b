//! In-process [`KvStore`] and [`CatalogClient`] implementations.
//!
//! Both keep their data in memory, support failure injection, and are cheap
//! to clone; clones share state. They are meant for tests, demos and local
//! development.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::{CatalogClient, KvPair, KvStore, ServiceListing};
use crate::core::RawServiceRecord;
use crate::error::StoreError;

/// Capacity of each watch subscription channel.
const WATCH_CAPACITY: usize = 16;

struct KvInner {
    entries: Mutex<BTreeMap<String, String>>,
    unreachable: AtomicBool,
    version: watch::Sender<u64>,
    epoch: watch::Sender<u64>,
}

/// A key/value store held in memory.
///
/// # Examples
///
/// ```rust
/// use routesync::sources::{KvStore, MemoryKvStore};
///
/// # async fn example() {
/// let store = MemoryKvStore::new();
/// store.put("/traefik/backends/web/servers/s1/url", "http://10.0.0.1:80");
/// let pair = store.get("/traefik/backends/web/servers/s1/url").await.unwrap();
/// assert_eq!(pair.unwrap().value, "http://10.0.0.1:80");
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryKvStore {
    inner: Arc<KvInner>,
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(KvInner {
                entries: Mutex::new(BTreeMap::new()),
                unreachable: AtomicBool::new(false),
                version: watch::channel(0).0,
                epoch: watch::channel(0).0,
            }),
        }
    }

    /// Set a key and notify watchers.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.entries.lock().insert(key.into(), value.into());
        self.bump();
    }

    /// Remove a key and notify watchers.
    pub fn delete(&self, key: &str) {
        let removed = self.inner.entries.lock().remove(key).is_some();
        if removed {
            self.bump();
        }
    }

    /// Remove every key below a prefix and notify watchers once.
    pub fn delete_tree(&self, prefix: &str) {
        self.inner
            .entries
            .lock()
            .retain(|key, _| !key.starts_with(prefix));
        self.bump();
    }

    /// Notify watchers without changing anything.
    pub fn touch(&self) {
        self.bump();
    }

    /// Make every operation fail with [`StoreError::Unreachable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Close every open watch subscription.
    pub fn close_watches(&self) {
        self.inner.epoch.send_modify(|epoch| *epoch += 1);
    }

    fn bump(&self) {
        self.inner.version.send_modify(|version| *version += 1);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable("memory store marked unreachable".to_string()));
        }
        Ok(())
    }

    fn subtree(&self, prefix: &str) -> Vec<KvPair> {
        self.inner
            .entries
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KvPair::new(key.clone(), value.clone()))
            .collect()
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<KvPair>, StoreError> {
        self.check()?;
        Ok(self
            .inner
            .entries
            .lock()
            .get(key)
            .map(|value| KvPair::new(key, value.clone())))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>, StoreError> {
        self.check()?;
        Ok(self.subtree(prefix))
    }

    async fn watch_tree(&self, prefix: &str) -> Result<mpsc::Receiver<Vec<KvPair>>, StoreError> {
        self.check()?;

        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let store = self.clone();
        let prefix = prefix.to_string();
        let mut versions = self.inner.version.subscribe();
        let mut epoch = self.inner.epoch.subscribe();
        versions.borrow_and_update();
        epoch.borrow_and_update();

        tokio::spawn(async move {
            if tx.send(store.subtree(&prefix)).await.is_err() {
                return;
            }
            loop {
                tokio::select! {
                    changed = versions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if tx.send(store.subtree(&prefix)).await.is_err() {
                            break;
                        }
                    }
                    _ = epoch.changed() => break,
                }
            }
        });

        Ok(rx)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.inner.entries.lock().contains_key(key))
    }
}

#[derive(Default)]
struct CatalogState {
    tags: BTreeMap<String, Vec<String>>,
    nodes: BTreeMap<String, Vec<RawServiceRecord>>,
    failing_services: BTreeSet<String>,
    failing_lists: usize,
    unreachable: bool,
    node_fetches: BTreeMap<String, usize>,
}

struct CatalogInner {
    state: Mutex<CatalogState>,
    index: watch::Sender<u64>,
    list_calls: AtomicUsize,
}

/// A service catalog held in memory, with blocking listings.
///
/// The catalog index starts at 1 and moves on every mutation.
///
/// # Examples
///
/// ```rust
/// use routesync::core::RawServiceRecord;
/// use routesync::sources::{CatalogClient, MemoryCatalog};
/// use std::time::Duration;
///
/// # async fn example() {
/// let catalog = MemoryCatalog::new();
/// catalog.register(RawServiceRecord::new("web", "node-1", "10.0.0.1", 80));
///
/// let listing = catalog.list_services(0, Duration::from_secs(1)).await.unwrap();
/// assert!(listing.services.contains_key("web"));
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryCatalog {
    inner: Arc<CatalogInner>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                state: Mutex::new(CatalogState::default()),
                index: watch::channel(1).0,
                list_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Register an instance; its tags are merged into the service's catalog tags.
    pub fn register(&self, record: RawServiceRecord) {
        {
            let mut state = self.inner.state.lock();
            let tags = state.tags.entry(record.service_name.clone()).or_default();
            for tag in &record.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
            state
                .nodes
                .entry(record.service_name.clone())
                .or_default()
                .push(record);
        }
        self.bump();
    }

    /// Remove the instances of `service` running on `node_name`.
    ///
    /// The service disappears from listings once its last instance is gone.
    pub fn deregister(&self, service: &str, node_name: &str) {
        {
            let mut state = self.inner.state.lock();
            let now_empty = match state.nodes.get_mut(service) {
                Some(nodes) => {
                    nodes.retain(|node| node.node_name != node_name);
                    nodes.is_empty()
                }
                None => false,
            };
            if now_empty {
                state.nodes.remove(service);
                state.tags.remove(service);
            }
        }
        self.bump();
    }

    /// Advance the index without changing any data.
    pub fn touch(&self) {
        self.bump();
    }

    /// Make node fetches of `service` fail.
    pub fn set_failing_service(&self, service: &str, failing: bool) {
        let mut state = self.inner.state.lock();
        if failing {
            state.failing_services.insert(service.to_string());
        } else {
            state.failing_services.remove(service);
        }
    }

    /// Make the next `count` listings fail.
    pub fn fail_next_lists(&self, count: usize) {
        self.inner.state.lock().failing_lists = count;
    }

    /// Make every call fail with [`StoreError::Unreachable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.state.lock().unreachable = unreachable;
    }

    /// Current catalog index.
    pub fn index(&self) -> u64 {
        *self.inner.index.borrow()
    }

    /// Number of listings requested so far.
    pub fn list_calls(&self) -> usize {
        self.inner.list_calls.load(Ordering::SeqCst)
    }

    /// Number of node fetches requested for `service` so far.
    pub fn node_fetches(&self, service: &str) -> usize {
        self.inner
            .state
            .lock()
            .node_fetches
            .get(service)
            .copied()
            .unwrap_or(0)
    }

    fn bump(&self) {
        self.inner.index.send_modify(|index| *index += 1);
    }

    fn listing(&self) -> ServiceListing {
        let state = self.inner.state.lock();
        ServiceListing {
            services: state.tags.clone(),
            index: *self.inner.index.borrow(),
        }
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogClient for MemoryCatalog {
    async fn list_services(
        &self,
        wait_index: u64,
        wait_time: Duration,
    ) -> Result<ServiceListing, StoreError> {
        self.inner.list_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.inner.state.lock();
            if state.unreachable {
                return Err(StoreError::Unreachable("memory catalog marked unreachable".to_string()));
            }
            if state.failing_lists > 0 {
                state.failing_lists -= 1;
                return Err(StoreError::Backend("injected listing failure".to_string()));
            }
        }

        let mut index = self.inner.index.subscribe();
        if *index.borrow_and_update() == wait_index {
            // Timing out is a normal outcome of a blocking query.
            let _ = tokio::time::timeout(wait_time, index.changed()).await;
        }
        Ok(self.listing())
    }

    async fn healthy_service_nodes(
        &self,
        service: &str,
    ) -> Result<Vec<RawServiceRecord>, StoreError> {
        let mut state = self.inner.state.lock();
        *state.node_fetches.entry(service.to_string()).or_default() += 1;
        if state.unreachable {
            return Err(StoreError::Unreachable("memory catalog marked unreachable".to_string()));
        }
        if state.failing_services.contains(service) {
            return Err(StoreError::Backend(format!("injected failure for '{}'", service)));
        }
        Ok(state.nodes.get(service).cloned().unwrap_or_default())
    }
}
