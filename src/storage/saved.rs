use std::sync::Arc;

use crate::feed::Article;
use crate::storage::KeyValueStore;

const SAVED_KEY: &str = "saved_articles";

/// The user's saved-article list, persisted as one JSON array under a
/// fixed key.
///
/// Articles are stored exactly as fetched, unknown fields included, so a
/// save made against one API plan still renders after the plan changes.
/// Deduplication keys off [`Article::identity`]; articles that carry no
/// identity are always appended and can only be removed wholesale.
///
/// Every operation fails open the way the feed cache does: a broken store
/// reads as an empty list and refuses writes without erroring. An
/// unreadable stored blob is never overwritten by `save` — losing the
/// user's list to one bad write is worse than rejecting a new entry.
pub struct SavedArticles {
    store: Arc<dyn KeyValueStore>,
}

impl SavedArticles {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Append `article` unless an entry with the same identity already
    /// exists. Returns whether the list changed.
    pub async fn save(&self, article: &Article) -> bool {
        let mut existing = match self.load().await {
            Some(list) => list,
            None => return false,
        };

        if let Some(id) = article.identity() {
            if existing.iter().any(|e| e.identity() == Some(id)) {
                tracing::debug!(id = %id, "Article already saved");
                return false;
            }
        }

        existing.push(article.clone());
        if self.persist(&existing).await {
            tracing::info!(id = article.identity().unwrap_or("<unidentified>"), "Article saved");
            true
        } else {
            false
        }
    }

    /// All saved articles in insertion order. Empty on any failure.
    pub async fn list(&self) -> Vec<Article> {
        self.load().await.unwrap_or_default()
    }

    /// Remove every entry whose identity equals `id`. Returns whether
    /// anything was removed.
    pub async fn remove(&self, id: &str) -> bool {
        let existing = match self.load().await {
            Some(list) => list,
            None => return false,
        };

        let before = existing.len();
        let kept: Vec<Article> = existing
            .into_iter()
            .filter(|e| e.identity() != Some(id))
            .collect();
        if kept.len() == before {
            return false;
        }

        if self.persist(&kept).await {
            tracing::info!(id = %id, removed = before - kept.len(), "Article removed");
            true
        } else {
            false
        }
    }

    /// `None` signals an unusable store or blob, which callers must not
    /// write over. A merely missing key is an empty list.
    async fn load(&self) -> Option<Vec<Article>> {
        let raw = match self.store.get(SAVED_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Some(Vec::new()),
            Err(e) => {
                tracing::warn!(error = %e, "Saved articles unavailable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(list) => Some(list),
            Err(e) => {
                tracing::warn!(error = %e, "Saved articles blob unreadable");
                None
            }
        }
    }

    async fn persist(&self, articles: &[Article]) -> bool {
        let payload = match serde_json::to_string(articles) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize saved articles");
                return false;
            }
        };
        match self.store.set(SAVED_KEY, &payload).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist saved articles");
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
