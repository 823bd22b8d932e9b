// Price cache port and its in-memory backend.
//
// Two namespaces share one interface: a hot namespace with a short TTL for
// live reads and a stale namespace with a long TTL serving fallback reads.
// Values are price integers serialized as decimal strings.

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::{config::PRICE_CACHE_CAPACITY, core::error::CacheError};

pub const HOT_PRICE_PREFIX: &str = "price:hot:";
pub const STALE_PRICE_PREFIX: &str = "price:stale:";

pub fn hot_price_key(external_id: &str) -> String {
    format!("{}{}", HOT_PRICE_PREFIX, external_id)
}

pub fn stale_price_key(external_id: &str) -> String {
    format!("{}{}", STALE_PRICE_PREFIX, external_id)
}

/// The cache port. Lookups that fail at the backend level are treated as
/// misses by the oracle, never as hard errors.
#[async_trait]
pub trait PriceCache: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn get_multi(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, String>, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Drop every key under the given prefix.
    async fn flush_namespace(&self, prefix: &str) -> Result<(), CacheError>;
}

struct CachedValue {
    value: String,
    expires_at: Instant,
}

/// LRU-bounded in-memory cache with TTL enforced on read.
pub struct MemoryPriceCache {
    entries: Mutex<LruCache<String, CachedValue>>,
}

impl Default for MemoryPriceCache {
    fn default() -> Self {
        Self::new(PRICE_CACHE_CAPACITY)
    }
}

impl MemoryPriceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("Non zero cache capacity"),
            )),
        }
    }
}

#[async_trait]
impl PriceCache for MemoryPriceCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(cached) if cached.expires_at > Instant::now() => {
                Ok(Some(cached.value.clone()))
            }
            Some(_) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        entries.put(
            key.to_owned(),
            CachedValue {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get_multi(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, String>, CacheError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let mut found = HashMap::new();
        for key in keys {
            match entries.get(key) {
                Some(cached) if cached.expires_at > now => {
                    found.insert(key.clone(), cached.value.clone());
                }
                Some(_) => {
                    entries.pop(key);
                }
                None => {}
            }
        }
        Ok(found)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.pop(key);
        Ok(())
    }

    async fn flush_namespace(&self, prefix: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        let keys: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            entries.pop(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ttl_expires_on_read() {
        let cache = MemoryPriceCache::new(16);
        cache
            .set("price:hot:bitcoin", "42".into(), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(
            cache.get("price:hot:bitcoin").await.unwrap(),
            Some("42".to_owned())
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("price:hot:bitcoin").await.unwrap(), None);
    }

    #[tokio::test]
    async fn flush_namespace_only_hits_prefix() {
        let cache = MemoryPriceCache::new(16);
        let ttl = Duration::from_secs(60);
        cache.set(&hot_price_key("bitcoin"), "1".into(), ttl).await.unwrap();
        cache.set(&hot_price_key("ethereum"), "2".into(), ttl).await.unwrap();
        cache.set(&stale_price_key("bitcoin"), "3".into(), ttl).await.unwrap();

        cache.flush_namespace(HOT_PRICE_PREFIX).await.unwrap();
        assert_eq!(cache.get(&hot_price_key("bitcoin")).await.unwrap(), None);
        assert_eq!(cache.get(&hot_price_key("ethereum")).await.unwrap(), None);
        assert_eq!(
            cache.get(&stale_price_key("bitcoin")).await.unwrap(),
            Some("3".to_owned())
        );
    }

    #[tokio::test]
    async fn get_multi_skips_expired() {
        let cache = MemoryPriceCache::new(16);
        cache
            .set("a", "1".into(), Duration::from_millis(10))
            .await
            .unwrap();
        cache.set("b", "2".into(), Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let found = cache
            .get_multi(&["a".to_owned(), "b".to_owned(), "c".to_owned()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("b"), Some(&"2".to_owned()));
    }
}
