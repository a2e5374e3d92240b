//! Read helpers over a [`KvStore`] that degrade instead of failing.

use std::collections::BTreeSet;

use tracing::warn;

use super::{KvStore, StoreBackend};
use crate::error::StoreError;

/// Key probed to test that the store answers.
pub const CONNECTION_PROBE_KEY: &str = "/routesync-connection-probe";

/// Reads a key tree relative to joined path parts.
///
/// Store errors are logged and read as "not found", so a transient outage
/// degrades a build instead of aborting it.
pub struct KeyTreeReader<S> {
    store: S,
    backend: StoreBackend,
}

impl<S: KvStore> KeyTreeReader<S> {
    /// Wrap a store.
    pub fn new(store: S, backend: StoreBackend) -> Self {
        Self { store, backend }
    }

    /// The wrapped store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The store kind.
    pub fn backend(&self) -> StoreBackend {
        self.backend
    }

    /// Key as sent to the store.
    pub fn store_key<'a>(&self, key: &'a str) -> &'a str {
        if self.backend.strips_leading_separator() {
            key.trim_start_matches('/')
        } else {
            key
        }
    }

    /// Full paths of the immediate children of the joined prefix, sorted.
    ///
    /// `list(&["/traefik", "/backends/"])` over `/traefik/backends/b1/url`
    /// yields `["/traefik/backends/b1"]`.
    pub async fn list(&self, parts: &[&str]) -> Vec<String> {
        let prefix = parts.concat();
        let store_prefix = self.store_key(&prefix);

        let pairs = match self.store.list(store_prefix).await {
            Ok(pairs) => pairs,
            Err(err) => {
                warn!(key = %prefix, error = %err, "Cannot list keys");
                return Vec::new();
            }
        };

        let children: BTreeSet<String> = pairs
            .iter()
            .filter_map(|pair| {
                let relative = self.store_key(&pair.key).strip_prefix(store_prefix)?;
                let child = relative.split('/').next()?;
                (!child.is_empty()).then(|| format!("{}{}", prefix, child))
            })
            .collect();
        children.into_iter().collect()
    }

    /// Value of the joined key, or `default` when absent or unreadable.
    pub async fn get(&self, default: &str, parts: &[&str]) -> String {
        let key = parts.concat();
        match self.store.get(self.store_key(&key)).await {
            Ok(Some(pair)) => pair.value,
            Ok(None) => default.to_string(),
            Err(err) => {
                warn!(key = %key, error = %err, default, "Cannot get key, using default");
                default.to_string()
            }
        }
    }

    /// Comma separated value of the joined key; empty when absent.
    pub async fn split_get(&self, parts: &[&str]) -> Vec<String> {
        let value = self.get("", parts).await;
        crate::core::split_list(&value).unwrap_or_default()
    }

    /// Whether the joined key exists; unreadable keys count as missing.
    pub async fn exists(&self, parts: &[&str]) -> bool {
        let key = parts.concat();
        match self.store.exists(self.store_key(&key)).await {
            Ok(found) => found,
            Err(err) => {
                warn!(key = %key, error = %err, "Cannot check key");
                false
            }
        }
    }

    /// Probe the store; the only read that reports errors.
    ///
    /// # Errors
    ///
    /// Returns the store error if the probe fails.
    pub async fn check_connection(&self, root: &str) -> Result<(), StoreError> {
        let key = format!("{}{}", root.trim_end_matches('/'), CONNECTION_PROBE_KEY);
        self.store.exists(self.store_key(&key)).await.map(|_| ())
    }
}

/// Last `/`-separated segment of a key.
pub fn last_segment(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MemoryKvStore;

    async fn seeded(backend: StoreBackend) -> KeyTreeReader<MemoryKvStore> {
        let store = MemoryKvStore::new();
        let root = if backend.strips_leading_separator() { "traefik" } else { "/traefik" };
        for (key, value) in [
            ("/backends/b1/servers/s1/url", "http://10.0.0.1:80"),
            ("/backends/b1/servers/s2/url", "http://10.0.0.2:80"),
            ("/backends/b2/circuitbreaker/expression", "NetworkErrorRatio() > 0.5"),
            ("/frontends/f1/entrypoints", "http, https"),
        ] {
            store.put(format!("{}{}", root, key), value);
        }
        KeyTreeReader::new(store, backend)
    }

    #[tokio::test]
    async fn test_list_children() {
        let reader = seeded(StoreBackend::Consul).await;
        assert_eq!(
            reader.list(&["/traefik", "/backends/"]).await,
            vec!["/traefik/backends/b1", "/traefik/backends/b2"]
        );
        assert_eq!(
            reader.list(&["/traefik/backends/b1", "/servers/"]).await,
            vec!["/traefik/backends/b1/servers/s1", "/traefik/backends/b1/servers/s2"]
        );
        assert!(reader.list(&["/traefik", "/missing/"]).await.is_empty());
    }

    #[tokio::test]
    async fn test_etcd_strips_leading_separator() {
        let reader = seeded(StoreBackend::Etcd).await;
        assert_eq!(reader.store_key("/traefik/x"), "traefik/x");
        assert_eq!(
            reader.list(&["/traefik", "/backends/"]).await,
            vec!["/traefik/backends/b1", "/traefik/backends/b2"]
        );
        assert_eq!(
            reader.get("", &["/traefik/backends/b1", "/servers/s1", "/url"]).await,
            "http://10.0.0.1:80"
        );
    }

    #[tokio::test]
    async fn test_consul_keeps_leading_separator() {
        let reader = seeded(StoreBackend::Consul).await;
        assert_eq!(reader.store_key("/traefik/x"), "/traefik/x");
    }

    #[tokio::test]
    async fn test_get_and_split_get() {
        let reader = seeded(StoreBackend::Consul).await;
        assert_eq!(
            reader.get("", &["/traefik/backends/b2", "/circuitbreaker/", "expression"]).await,
            "NetworkErrorRatio() > 0.5"
        );
        assert_eq!(reader.get("wrr", &["/traefik/backends/b2", "/loadbalancer/method"]).await, "wrr");
        assert_eq!(
            reader.split_get(&["/traefik/frontends/f1", "/entrypoints"]).await,
            vec!["http", "https"]
        );
        assert!(reader.split_get(&["/traefik/frontends/f1", "/basicauth"]).await.is_empty());
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_degraded_reads_log_warnings() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(captured.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let reader = seeded(StoreBackend::Consul).await;
        reader.store().set_unreachable(true);
        reader.list(&["/traefik", "/backends/"]).await;
        reader.get("", &["/traefik/frontends/f1/entrypoints"]).await;
        reader.exists(&["/traefik/frontends/f1/entrypoints"]).await;

        let output = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert!(output.contains("Cannot list keys"), "{}", output);
        assert!(output.contains("Cannot get key"), "{}", output);
        assert!(output.contains("Cannot check key"), "{}", output);
    }

    #[tokio::test]
    async fn test_store_errors_degrade() {
        let reader = seeded(StoreBackend::Consul).await;
        reader.store().set_unreachable(true);

        assert!(reader.list(&["/traefik", "/backends/"]).await.is_empty());
        assert_eq!(reader.get("fallback", &["/traefik/frontends/f1/entrypoints"]).await, "fallback");
        assert!(!reader.exists(&["/traefik/frontends/f1/entrypoints"]).await);
        assert!(reader.check_connection("/traefik").await.is_err());

        reader.store().set_unreachable(false);
        assert!(reader.check_connection("/traefik").await.is_ok());
        assert!(reader.exists(&["/traefik/frontends/f1/entrypoints"]).await);
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("/traefik/backends/b1"), "b1");
        assert_eq!(last_segment("b1"), "b1");
        assert_eq!(last_segment("/traefik/"), "");
    }
}
