use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use crate::feed::cache::FeedCache;
use crate::feed::rate_limit::RateLimiter;
use crate::feed::types::{Article, ALL_CATEGORY};

const MAX_BODY_BYTES: usize = 5 * 1024 * 1024; // 5MB

/// Errors that can occur while talking to the news API.
///
/// None of these cross [`FeedFetcher::fetch`]'s boundary; every variant
/// resolves internally to a cache fallback or an empty page. They exist so
/// the fallback paths can log precisely what went wrong.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with a non-2xx status other than 429/422
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Server answered 429; carries the wait the server asked for
    #[error("Rate limited; retry after {}s", .0.as_secs())]
    RateLimited(Duration),
    /// Server answered 422, rejecting the page parameter
    #[error("Page parameter rejected")]
    PageRejected,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// The configured base URL does not parse
    #[error("Invalid request URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Connection and policy knobs for [`FeedFetcher`], lifted out of the
/// application config at startup.
#[derive(Clone)]
pub struct FetchOptions {
    /// Origin of the news API, e.g. `https://newsdata.io`.
    pub base_url: String,
    pub api_key: SecretString,
    pub country: String,
    pub language: String,
    /// Per-request deadline covering connect through headers.
    pub timeout: Duration,
    /// Backoff applied on 429 when the `retry-after` header is absent or
    /// unreadable.
    pub default_retry_after: Duration,
    /// When rate limited, serve cache entries past their TTL instead of
    /// nothing.
    pub serve_stale_when_rate_limited: bool,
}

type FlightKey = (String, u32);
type SharedFetch = Shared<BoxFuture<'static, Vec<Article>>>;

/// Fetches feed pages from the news API, falling back to [`FeedCache`]
/// whenever the network lets it down.
///
/// `fetch` never fails: rate limiting, timeouts, bad statuses, and
/// malformed bodies all degrade to cached data or an empty page, so the
/// caller always has something to render. Concurrent calls for the same
/// `(category, page)` are coalesced into a single request whose result all
/// callers share.
pub struct FeedFetcher {
    inner: Arc<Inner>,
    inflight: Arc<Mutex<HashMap<FlightKey, SharedFetch>>>,
}

struct Inner {
    client: reqwest::Client,
    cache: Arc<FeedCache>,
    limiter: Arc<RateLimiter>,
    options: FetchOptions,
}

impl FeedFetcher {
    pub fn new(
        client: reqwest::Client,
        cache: Arc<FeedCache>,
        limiter: Arc<RateLimiter>,
        options: FetchOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                cache,
                limiter,
                options,
            }),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fetch one page of a category's feed.
    ///
    /// # Behavior
    ///
    /// - An armed rate limit skips the network entirely and serves cache.
    /// - A 429 response arms the rate limit from its `retry-after` header
    ///   and serves cache.
    /// - A 422 response triggers exactly one retry without the page
    ///   parameter.
    /// - Any other failure serves whatever fresh cache exists.
    /// - A 2xx response with no usable articles returns an empty page
    ///   without touching the cache.
    ///
    /// Never returns an error; the worst outcome is an empty `Vec`.
    pub async fn fetch(&self, page: u32, category: &str) -> Vec<Article> {
        let key: FlightKey = (category.to_string(), page);

        let fut = {
            let mut inflight = match self.inflight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(existing) = inflight.get(&key) {
                tracing::debug!(category = %category, page = page, "Joining in-flight fetch");
                existing.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let inflight_map = Arc::clone(&self.inflight);
                let owned_key = key.clone();
                let fut: SharedFetch = async move {
                    let result = inner.fetch_page(owned_key.1, &owned_key.0).await;
                    let mut map = match inflight_map.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    map.remove(&owned_key);
                    result
                }
                .boxed()
                .shared();
                inflight.insert(key, fut.clone());
                fut
            }
        };

        fut.await
    }
}

impl Inner {
    async fn fetch_page(&self, page: u32, category: &str) -> Vec<Article> {
        if self.limiter.is_limited().await {
            tracing::info!(category = %category, page = page, "Rate limited; serving cache");
            return self.rate_limited_fallback(category).await;
        }

        match self.request(page, category, true).await {
            Ok(articles) if !articles.is_empty() => {
                self.cache.write(category, &articles).await;
                articles
            }
            // Empty or unusable body on a 2xx is "no data", not a failure.
            Ok(_) => Vec::new(),
            Err(FetchError::RateLimited(wait)) => {
                self.limiter.trip(wait).await;
                self.rate_limited_fallback(category).await
            }
            Err(FetchError::PageRejected) => self.retry_without_page(page, category).await,
            Err(e) => {
                tracing::warn!(category = %category, page = page, error = %e, "Fetch failed; serving cache");
                self.offline_fallback(category).await
            }
        }
    }

    /// The single 422 recovery attempt. Whatever happens here, the limiter
    /// is left alone; a second rejection just degrades to cache.
    async fn retry_without_page(&self, page: u32, category: &str) -> Vec<Article> {
        tracing::warn!(category = %category, page = page, "Page parameter rejected; retrying without it");
        match self.request(page, category, false).await {
            Ok(articles) if !articles.is_empty() => {
                self.cache.write(category, &articles).await;
                articles
            }
            Ok(_) => self.offline_fallback(category).await,
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "Retry without page failed; serving cache");
                self.offline_fallback(category).await
            }
        }
    }

    async fn rate_limited_fallback(&self, category: &str) -> Vec<Article> {
        let cached = if self.options.serve_stale_when_rate_limited {
            self.cache.read_any(category).await
        } else {
            self.cache.read(category).await
        };
        cached.unwrap_or_default()
    }

    async fn offline_fallback(&self, category: &str) -> Vec<Article> {
        self.cache.read(category).await.unwrap_or_default()
    }

    fn request_url(&self, page: u32, category: &str, with_page: bool) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.options.base_url)?.join("/api/1/latest")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("apikey", self.options.api_key.expose_secret())
                .append_pair("country", &self.options.country)
                .append_pair("language", &self.options.language);
            if with_page {
                query.append_pair("page", &page.to_string());
            }
            // "all" is a synthetic category, not a filter the API knows.
            if category != ALL_CATEGORY {
                query.append_pair("category", category);
            }
        }
        Ok(url)
    }

    async fn request(
        &self,
        page: u32,
        category: &str,
        with_page: bool,
    ) -> Result<Vec<Article>, FetchError> {
        let url = self.request_url(page, category, with_page)?;
        tracing::debug!(category = %category, page = page, with_page = with_page, "Fetching feed page");

        let response = tokio::time::timeout(self.options.timeout, self.client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_after(&response).unwrap_or(self.options.default_retry_after);
            return Err(FetchError::RateLimited(wait));
        }
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            return Err(FetchError::PageRejected);
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_BODY_BYTES).await?;
        Ok(parse_results(&bytes))
    }
}

/// Parse the `retry-after` header as whole seconds. HTTP-date forms are
/// not parsed; they fall back to the configured default.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Extract the article list from a success body. Anything unusable —
/// invalid JSON, a missing or non-array `results` field, elements that are
/// not objects — collapses to an empty list rather than an error.
fn parse_results(bytes: &[u8]) -> Vec<Article> {
    #[derive(serde::Deserialize)]
    struct Envelope {
        #[serde(default)]
        results: Option<serde_json::Value>,
    }

    let envelope: Envelope = match serde_json::from_slice(bytes) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable response body; treating as empty page");
            return Vec::new();
        }
    };

    match envelope.results {
        Some(serde_json::Value::Array(items)) if !items.is_empty() => {
            match serde_json::from_value::<Vec<Article>>(serde_json::Value::Array(items)) {
                Ok(articles) => articles,
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable article entries; treating as empty page");
                    Vec::new()
                }
            }
        }
        _ => Vec::new(),
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

// ============================================================================
// Tests
// ============================================================================
