//! Feed retrieval with offline fallback.
//!
//! This module owns everything between the news API and the caller's
//! article list:
//!
//! - [`types`] - The loosely-typed [`Article`] model and category catalog
//! - [`cache`] - TTL-gated per-category page cache over a key-value store
//! - [`rate_limit`] - Persisted 429 backoff window
//! - [`client`] - The fetch orchestration tying the three together
//!
//! The headline guarantee is that [`FeedFetcher::fetch`] never fails:
//! every network or storage problem degrades to cached data or an empty
//! page.

mod cache;
mod client;
mod rate_limit;
mod types;

pub use cache::FeedCache;
pub use client::{FeedFetcher, FetchError, FetchOptions};
pub use rate_limit::RateLimiter;
pub use types::{Article, ALL_CATEGORY, CATEGORIES};

/// Filter a fetched page down to articles whose title contains `query`,
/// case-insensitively. An empty query keeps everything; articles without
/// a title never match a non-empty query.
pub fn search_articles<'a>(articles: &'a [Article], query: &str) -> Vec<&'a Article> {
    articles
        .iter()
        .filter(|article| article.matches_query(query))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(title: Option<&str>) -> Article {
        let mut value = serde_json::json!({ "article_id": "x" });
        if let Some(t) = title {
            value["title"] = serde_json::json!(t);
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_search_matches_title_case_insensitively() {
        let articles = vec![
            article(Some("Budget Day in Parliament")),
            article(Some("Cricket roundup")),
            article(None),
        ];

        let hits = search_articles(&articles, "budget");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].display_title(), Some("Budget Day in Parliament"));
    }

    #[test]
    fn test_empty_query_keeps_everything() {
        let articles = vec![article(Some("A")), article(None)];
        assert_eq!(search_articles(&articles, "").len(), 2);
    }

    #[test]
    fn test_untitled_articles_never_match() {
        let articles = vec![article(None)];
        assert!(search_articles(&articles, "anything").is_empty());
    }
}
