//! In-memory key-value store (for testing)

use crate::error::{RegistryError, Result};
use crate::store::{KeyValue, KvStore, StoreConnector};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    mod_revision: i64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    revision: i64,
}

/// In-memory key-value store with etcd-like revisions
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a raw value, bypassing any connector
    pub async fn raw_put(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        let mut inner = self.inner.write().await;
        inner.revision += 1;
        let mod_revision = inner.revision;
        inner.entries.insert(
            key.into(),
            Entry {
                value: value.into(),
                mod_revision,
            },
        );
    }

    /// Read a raw value
    pub async fn raw_get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner
            .read()
            .await
            .entries
            .get(key)
            .map(|e| e.value.clone())
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.raw_put(key, value).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        Ok(self.inner.read().await.entries.get(key).map(|e| KeyValue {
            key: key.to_string(),
            value: e.value.clone(),
            mod_revision: e.mod_revision,
        }))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| KeyValue {
                key: k.clone(),
                value: e.value.clone(),
                mod_revision: e.mod_revision,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let mut inner = self.inner.write().await;
        if inner.entries.remove(key).is_some() {
            inner.revision += 1;
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn put_if_revision(
        &self,
        key: &str,
        expected: Option<i64>,
        value: &[u8],
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let current = inner.entries.get(key).map(|e| e.mod_revision);
        if current != expected {
            return Ok(false);
        }
        inner.revision += 1;
        let mod_revision = inner.revision;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                mod_revision,
            },
        );
        Ok(true)
    }
}

/// Connector handing out handles to a shared [`MemoryStore`].
///
/// Can simulate an unreachable cluster and slow requests.
#[derive(Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
    reachable: Arc<AtomicBool>,
    latency: Option<Duration>,
    dial_delay: Option<Duration>,
    connects: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
}

impl MemoryConnector {
    /// Create connector over a fresh store
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Create connector over an existing store
    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            store,
            reachable: Arc::new(AtomicBool::new(true)),
            latency: None,
            dial_delay: None,
            connects: Arc::new(AtomicUsize::new(0)),
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Delay every request made through handles from this connector
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delay every dial
    pub fn with_dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = Some(delay);
        self
    }

    /// Make subsequent dials fail (or succeed again)
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Underlying store
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Number of successful dials so far
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of handles currently alive
    pub fn open_handles(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(
        &self,
        endpoints: &[String],
        _dial_timeout: Duration,
    ) -> Result<Box<dyn KvStore>> {
        if let Some(delay) = self.dial_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RegistryError::Connection(format!(
                "no reachable endpoint among {:?}",
                endpoints
            )));
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryHandle {
            store: self.store.clone(),
            latency: self.latency,
            open: self.open.clone(),
        }))
    }
}

struct MemoryHandle {
    store: MemoryStore,
    latency: Option<Duration>,
    open: Arc<AtomicUsize>,
}

impl MemoryHandle {
    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl KvStore for MemoryHandle {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.delay().await;
        self.store.put(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        self.delay().await;
        self.store.get(key).await
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        self.delay().await;
        self.store.get_prefix(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        self.delay().await;
        self.store.delete(key).await
    }

    async fn put_if_revision(
        &self,
        key: &str,
        expected: Option<i64>,
        value: &[u8],
    ) -> Result<bool> {
        self.delay().await;
        self.store.put_if_revision(key, expected, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_crud() {
        let store = MemoryStore::new();

        store.put("/a", b"1").await.unwrap();
        let kv = store.get("/a").await.unwrap().unwrap();
        assert_eq!(kv.value, b"1");

        assert_eq!(store.delete("/a").await.unwrap(), 1);
        assert_eq!(store.delete("/a").await.unwrap(), 0);
        assert!(store.get("/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prefix_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        store.raw_put("/services/api/10.0.0.2:80", "t").await;
        store.raw_put("/services/api/10.0.0.1:80", "t").await;
        store.raw_put("/services/apigw/10.0.0.3:80", "t").await;
        store.raw_put("/services/b/10.0.0.4:80", "t").await;

        let keys: Vec<String> = store
            .get_prefix("/services/api/")
            .await
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();

        assert_eq!(
            keys,
            vec!["/services/api/10.0.0.1:80", "/services/api/10.0.0.2:80"]
        );
    }

    #[tokio::test]
    async fn test_put_if_revision() {
        let store = MemoryStore::new();

        assert!(store.put_if_revision("/k", None, b"v1").await.unwrap());
        assert!(!store.put_if_revision("/k", None, b"v2").await.unwrap());

        let rev = store.get("/k").await.unwrap().unwrap().mod_revision;
        assert!(store.put_if_revision("/k", Some(rev), b"v3").await.unwrap());
        assert!(!store.put_if_revision("/k", Some(rev), b"v4").await.unwrap());
        assert_eq!(store.raw_get("/k").await.unwrap(), b"v3");
    }

    #[tokio::test]
    async fn test_connector_tracks_handles() {
        let connector = MemoryConnector::new();
        let endpoints = vec!["mem".to_string()];

        let handle = connector
            .connect(&endpoints, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(connector.open_handles(), 1);
        drop(handle);
        assert_eq!(connector.open_handles(), 0);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_connector() {
        let connector = MemoryConnector::new();
        connector.set_reachable(false);

        let result = connector.connect(&[], Duration::from_secs(1)).await;
        assert!(matches!(result, Err(RegistryError::Connection(_))));
        assert_eq!(connector.open_handles(), 0);
    }
}
