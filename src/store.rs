// src/store.rs
//
// Durable storage of push subscriptions, keyed by endpoint.

use crate::error::{AlertError, Result};
use crate::subscription::PushSubscription;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Every stored subscription, read once at startup.
    async fn load_all(&self) -> Result<Vec<PushSubscription>>;

    /// Insert or replace the subscription stored under its endpoint.
    async fn save(&self, subscription: &PushSubscription) -> Result<()>;

    async fn remove(&self, endpoint: &str) -> Result<()>;
}

/// Process-lifetime store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, PushSubscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, endpoint: &str) -> Option<PushSubscription> {
        self.entries.get(endpoint).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<PushSubscription>> {
        Ok(self.entries.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn save(&self, subscription: &PushSubscription) -> Result<()> {
        self.entries
            .insert(subscription.endpoint.clone(), subscription.clone());
        Ok(())
    }

    async fn remove(&self, endpoint: &str) -> Result<()> {
        self.entries.remove(endpoint);
        Ok(())
    }
}

/// Store kept as one JSON object `{endpoint: subscription}` on disk.
///
/// Every write rewrites the file through a temporary sibling and a rename,
/// so a crash leaves either the old or the new content.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, PushSubscription>>,
}

impl JsonFileStore {
    /// Open the store at `path`, reading existing content if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Opened subscription store {} with {} entries", path.display(), entries.len());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    async fn flush(&self, entries: &BTreeMap<String, PushSubscription>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| AlertError::Store(format!("writing {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AlertError::Store(format!("replacing {}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for JsonFileStore {
    async fn load_all(&self) -> Result<Vec<PushSubscription>> {
        Ok(self.entries.lock().await.values().cloned().collect())
    }

    async fn save(&self, subscription: &PushSubscription) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(subscription.endpoint.clone(), subscription.clone());
        self.flush(&entries).await
    }

    async fn remove(&self, endpoint: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(endpoint).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::{NotificationSettings, PushKeys};

    fn subscription(endpoint: &str) -> PushSubscription {
        PushSubscription::new(
            endpoint,
            PushKeys {
                p256dh: "key".into(),
                auth: "secret".into(),
            },
            NotificationSettings {
                subscribe_to_all: true,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        store.save(&subscription("a")).await.unwrap();
        store.save(&subscription("a")).await.unwrap();
        store.save(&subscription("b")).await.unwrap();
        assert_eq!(store.len(), 2);

        store.remove("a").await.unwrap();
        assert!(store.get("a").is_none());
        assert_eq!(store.load_all().await.unwrap(), vec![subscription("b")]);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
        store.save(&subscription("https://push.example/a")).await.unwrap();
        store.save(&subscription("https://push.example/b")).await.unwrap();
        store.remove("https://push.example/a").await.unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let all = reopened.load_all().await.unwrap();
        assert_eq!(all, vec![subscription("https://push.example/b")]);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        assert!(matches!(
            JsonFileStore::open(&path).await,
            Err(AlertError::Json(_))
        ));
    }
}
