use std::sync::Arc;
use std::time::Duration;

use crate::storage::{KeyValueStore, StoreError};

const RATE_LIMIT_KEY: &str = "rate_limit_reset";

/// Persisted backoff window for the upstream news API.
///
/// When the API answers 429 we record the epoch-millisecond instant the
/// window ends and refuse to fetch until it passes, surviving restarts
/// because the instant lives in the same store as the feed cache. The key
/// is cleaned up lazily on the first check after expiry. Store failures
/// always fail open: a broken store means we fetch, not that we stall.
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Time left in the active backoff window, if one is in force.
    /// Expired or unreadable windows are removed on the way out.
    pub async fn remaining(&self) -> Option<Duration> {
        let raw = match self.store.get(RATE_LIMIT_KEY).await {
            Ok(v) => v?,
            Err(e) => {
                tracing::warn!(error = %e, "Rate limit check failed; assuming not limited");
                return None;
            }
        };

        let reset_ms: i64 = match raw.parse() {
            Ok(ms) => ms,
            Err(_) => {
                tracing::warn!(value = %raw, "Discarding unreadable rate limit marker");
                let _ = self.store.remove(RATE_LIMIT_KEY).await;
                return None;
            }
        };

        let left_ms = reset_ms - now_ms();
        if left_ms > 0 {
            let left = Duration::from_millis(left_ms as u64);
            tracing::info!(wait_secs = left.as_secs() + 1, "Rate limited; waiting out the window");
            Some(left)
        } else {
            let _ = self.store.remove(RATE_LIMIT_KEY).await;
            None
        }
    }

    pub async fn is_limited(&self) -> bool {
        self.remaining().await.is_some()
    }

    /// Open a backoff window lasting `wait` from now, replacing any
    /// existing one.
    pub async fn trip(&self, wait: Duration) {
        let reset = now_ms() + wait.as_millis() as i64;
        match self.store.set(RATE_LIMIT_KEY, &reset.to_string()).await {
            Ok(()) => {
                tracing::warn!(wait_secs = wait.as_secs(), "Rate limit tripped")
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist rate limit window")
            }
        }
    }

    /// Forget the window early, e.g. when the user wipes local state.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(RATE_LIMIT_KEY).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_untripped_limiter_allows_fetches() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        assert!(!limiter.is_limited().await);
    }

    #[tokio::test]
    async fn test_tripped_limiter_blocks_within_window() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        limiter.trip(Duration::from_secs(60)).await;

        let left = limiter.remaining().await.unwrap();
        assert!(left <= Duration::from_secs(60));
        assert!(left > Duration::from_secs(58));
    }

    #[tokio::test]
    async fn test_expired_window_clears_lazily() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone());

        // A window that ended a second ago.
        let past = (now_ms() - 1_000).to_string();
        store.set(RATE_LIMIT_KEY, &past).await.unwrap();

        assert!(!limiter.is_limited().await);
        assert_eq!(store.get(RATE_LIMIT_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_garbled_marker_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone());
        store.set(RATE_LIMIT_KEY, "whenever").await.unwrap();

        assert!(!limiter.is_limited().await);
        assert_eq!(store.get(RATE_LIMIT_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_retrip_replaces_window() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone());

        limiter.trip(Duration::from_secs(5)).await;
        limiter.trip(Duration::from_secs(300)).await;

        let left = limiter.remaining().await.unwrap();
        assert!(left > Duration::from_secs(200));
    }

    #[tokio::test]
    async fn test_clear_forgets_window() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        limiter.trip(Duration::from_secs(600)).await;

        limiter.clear().await.unwrap();
        assert!(!limiter.is_limited().await);
    }

    #[tokio::test]
    async fn test_window_survives_reopen() {
        let dir = std::env::temp_dir().join(format!(
            "newsdeck-rate-limit-{}-{}",
            std::process::id(),
            now_ms()
        ));
        let path = dir.join("state.json");

        {
            let store = Arc::new(crate::storage::JsonFileStore::open(&path).await.unwrap());
            RateLimiter::new(store).trip(Duration::from_secs(600)).await;
        }
        {
            let store = Arc::new(crate::storage::JsonFileStore::open(&path).await.unwrap());
            assert!(RateLimiter::new(store).is_limited().await);
        }

        let _ = std::fs::remove_dir_all(&dir);
    }
}
