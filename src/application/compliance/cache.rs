use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Key -> (value, expiry) map. Expired entries are never served and are only
/// removed by an explicit `sweep_expired` call.
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    pub async fn insert(&self, key: impl Into<String>, value: V) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Drop expired entries, returning how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_hidden_then_swept() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("https://a.org", 1u32).await;
        assert_eq!(cache.get("https://a.org").await, Some(1));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("https://a.org").await, None);
        assert_eq!(cache.len().await, 1);

        assert_eq!(cache.sweep_expired().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn insert_replaces_and_refreshes_expiry() {
        let cache = TtlCache::new(Duration::from_secs(10));
        cache.insert("k", "old").await;
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.insert("k", "new").await;
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get("k").await, Some("new"));
        assert_eq!(cache.sweep_expired().await, 0);
    }
}
