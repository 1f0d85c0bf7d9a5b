//! TTL-memoized "latest item" lookups.
//!
//! Two protections for the upstream source: a per-key TTL cache, and a
//! per-process minimum spacing between actual fetches that applies no
//! matter how many concurrent dispatches ask. A failed refresh never
//! evicts what we already have — stale data beats none, unless the
//! caller explicitly demanded a fresh item.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use herald_core::config::SourceConfig;
use herald_core::error::{HeraldError, Result};
use herald_core::traits::ContentSource;
use herald_core::types::ContentItem;

struct CacheEntry {
    value: ContentItem,
    fetched_at: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    last_fetch: Option<Instant>,
}

pub struct ContentCache {
    source: Arc<dyn ContentSource>,
    ttl: Duration,
    min_fetch_interval: Duration,
    fetch_timeout: Duration,
    // One async mutex: serializes fetches, which is exactly what the
    // rate limiter needs anyway. The timeout above bounds how long it
    // can stay held across a fetch.
    inner: Mutex<CacheInner>,
}

impl ContentCache {
    pub fn new(
        source: Arc<dyn ContentSource>,
        ttl: Duration,
        min_fetch_interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            ttl,
            min_fetch_interval,
            fetch_timeout,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                last_fetch: None,
            }),
        }
    }

    pub fn from_config(source: Arc<dyn ContentSource>, config: &SourceConfig) -> Self {
        Self::new(
            source,
            config.cache_ttl(),
            config.min_fetch_interval(),
            config.fetch_timeout(),
        )
    }

    /// Return the latest item for `source_key`.
    ///
    /// A non-expired cached entry is returned without a network call
    /// unless `force_refresh` is set. A fetch failure serves the cached
    /// entry (even an expired one) when the caller did not force.
    pub async fn get_latest(&self, source_key: &str, force_refresh: bool) -> Result<ContentItem> {
        let mut inner = self.inner.lock().await;

        if !force_refresh
            && let Some(entry) = inner.entries.get(source_key)
            && entry.fetched_at.elapsed() < self.ttl
        {
            tracing::debug!("cache hit for '{source_key}'");
            return Ok(entry.value.clone());
        }

        // Minimum spacing applies to every fetch, cache state aside.
        if let Some(last) = inner.last_fetch {
            let since = last.elapsed();
            if since < self.min_fetch_interval {
                let wait = self.min_fetch_interval - since;
                tracing::debug!("spacing fetch for '{source_key}' by {wait:?}");
                tokio::time::sleep(wait).await;
            }
        }

        let fetched = match tokio::time::timeout(self.fetch_timeout, self.source.latest(source_key))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(HeraldError::Fetch(format!(
                "fetch for '{source_key}' timed out after {:?}",
                self.fetch_timeout
            ))),
        };
        inner.last_fetch = Some(Instant::now());

        match fetched {
            Ok(value) => {
                inner.entries.insert(
                    source_key.to_string(),
                    CacheEntry {
                        value: value.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(value)
            }
            Err(e) => {
                if !force_refresh && let Some(entry) = inner.entries.get(source_key) {
                    tracing::warn!("⚠️ fetch failed ({e}), serving cached item for '{source_key}'");
                    return Ok(entry.value.clone());
                }
                Err(e)
            }
        }
    }
}
