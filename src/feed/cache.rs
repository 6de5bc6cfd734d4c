use std::sync::Arc;
use std::time::Duration;

use crate::feed::types::{Article, CATEGORIES};
use crate::storage::KeyValueStore;

/// Offline cache for fetched feed pages, partitioned by category.
///
/// Each category owns two keys in the backing store: the serialized
/// article list and the epoch-millisecond write time. Both are written in
/// one batch so a reader never sees a payload without its timestamp. The
/// cache is strictly best-effort — write failures are logged and dropped,
/// read failures count as a miss — because a broken cache must never take
/// the feed down with it.
pub struct FeedCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

fn data_key(category: &str) -> String {
    format!("feed_cache_{category}")
}

fn expiry_key(category: &str) -> String {
    format!("feed_cache_expiry_{category}")
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl FeedCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Persist a fetched page for `category`, replacing any prior entry.
    /// Never fails: a cache that cannot be written is only a lost
    /// optimization.
    pub async fn write(&self, category: &str, articles: &[Article]) {
        let payload = match serde_json::to_string(articles) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "Failed to serialize feed cache entry");
                return;
            }
        };
        let stamp = now_ms().to_string();

        let data = data_key(category);
        let expiry = expiry_key(category);
        let pairs = [(data.as_str(), payload.as_str()), (expiry.as_str(), stamp.as_str())];

        match self.store.multi_set(&pairs).await {
            Ok(()) => {
                tracing::debug!(category = %category, count = articles.len(), "Cached feed page")
            }
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "Failed to write feed cache entry")
            }
        }
    }

    /// Read the cached page for `category` if one exists and is still
    /// fresh. Missing entries, unreadable entries, and stale entries all
    /// come back as `None`.
    pub async fn read(&self, category: &str) -> Option<Vec<Article>> {
        self.read_inner(category, true).await
    }

    /// Read the cached page for `category` regardless of age. Used only by
    /// the serve-stale-while-rate-limited policy; staleness still never
    /// deletes anything.
    pub async fn read_any(&self, category: &str) -> Option<Vec<Article>> {
        self.read_inner(category, false).await
    }

    async fn read_inner(&self, category: &str, enforce_ttl: bool) -> Option<Vec<Article>> {
        let data = data_key(category);
        let expiry = expiry_key(category);

        let values = match self.store.multi_get(&[data.as_str(), expiry.as_str()]).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "Feed cache read failed");
                return None;
            }
        };

        let (payload, stamp) = match (values.first(), values.get(1)) {
            (Some(Some(p)), Some(Some(s))) => (p.clone(), s.clone()),
            _ => return None,
        };

        if enforce_ttl {
            let saved_at: i64 = match stamp.parse() {
                Ok(ms) => ms,
                Err(_) => {
                    tracing::warn!(category = %category, stamp = %stamp, "Unreadable cache timestamp");
                    return None;
                }
            };
            let age_ms = now_ms().saturating_sub(saved_at);
            if age_ms > self.ttl.as_millis() as i64 {
                tracing::debug!(category = %category, age_ms = age_ms, "Cache entry expired");
                return None;
            }
        }

        match serde_json::from_str::<Vec<Article>>(&payload) {
            Ok(articles) => {
                tracing::debug!(category = %category, count = articles.len(), "Loaded cached feed page");
                Some(articles)
            }
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "Unreadable cache payload");
                None
            }
        }
    }

    /// Drop one category's partition. Unlike reads and writes this
    /// propagates store errors, since an explicit clear the user asked for
    /// should not fail silently.
    pub async fn clear(&self, category: &str) -> Result<(), crate::storage::StoreError> {
        let data = data_key(category);
        let expiry = expiry_key(category);
        self.store
            .remove_many(&[data.as_str(), expiry.as_str()])
            .await
    }

    /// Drop the partitions for every cataloged category. Categories cached
    /// under ad-hoc names outside [`CATEGORIES`] are untouched.
    pub async fn clear_all(&self) -> Result<(), crate::storage::StoreError> {
        for category in CATEGORIES {
            self.clear(category).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
