//! Response Cache - TTL cache for successful GET responses
//!
//! Entries are evicted lazily: a lookup that finds a stale entry removes it.
//! Staleness is `now - stored_at > ttl`; an entry exactly `ttl` old is still served.

use dashmap::DashMap;
use reqwest::Method;
use std::time::Duration;
use tokio::time::Instant;

use crate::response::ResponseData;
use crate::transport::RequestBody;

/// `"<METHOD>:<endpoint>:<serialized body>"`
pub type CacheKey = String;

pub fn cache_key(method: &Method, endpoint: &str, body: &RequestBody) -> CacheKey {
    format!("{}:{}:{}", method, endpoint, body.cache_fragment())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: ResponseData,
    stored_at: Instant,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<ResponseData> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if !self.is_stale(&entry, now) {
                return Some(entry.data.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| self.is_stale(entry, now));
        tracing::debug!(key, "Evicted stale cache entry");
        None
    }

    pub fn insert(&self, key: CacheKey, data: ResponseData) {
        self.entries.insert(
            key,
            CacheEntry {
                data,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Entries held, stale ones included until their next lookup
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_stale(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.stored_at) > self.ttl
    }
}
