use std::sync::OnceLock;
use std::time::Duration;

use futures::StreamExt;
use regex::Regex;
use thiserror::Error;

const MAX_CONTENT_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Paragraphs shorter than this are navigation, captions, or ads.
const MIN_PARAGRAPH_CHARS: usize = 50;

/// Anything below this after joining means we grabbed boilerplate, not
/// the article body.
const MIN_CONTENT_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum ContentError {
    /// The article carries no link to download
    #[error("Article has no URL")]
    MissingUrl,
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// The page yielded no paragraphs long enough to read
    #[error("No readable article content found")]
    NoContent,
}

fn paragraph_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<p[^>]*>(.*?)</p>").expect("paragraph pattern is valid"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("tag pattern is valid"))
}

/// Download an article page and reduce it to reader-view text.
///
/// The extraction is deliberately crude: collect `<p>` bodies, strip
/// markup and the common entities, drop everything too short to be prose,
/// and join what is left with blank lines. News pages that resist this
/// treatment come back as [`ContentError::NoContent`] so the caller can
/// fall back to the article's own description.
pub async fn download_reader_view(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<String, ContentError> {
    if url.is_empty() {
        return Err(ContentError::MissingUrl);
    }

    tracing::debug!(url = %url, "Downloading article content");

    let response = tokio::time::timeout(timeout, client.get(url).send())
        .await
        .map_err(|_| ContentError::Timeout)?
        .map_err(ContentError::Network)?;

    let status = response.status();
    if !status.is_success() {
        return Err(ContentError::HttpStatus(status.as_u16()));
    }

    let html = read_limited_text(response, MAX_CONTENT_SIZE).await?;
    match extract_paragraphs(&html) {
        Some(text) => {
            tracing::debug!(url = %url, chars = text.chars().count(), "Extracted reader view");
            Ok(text)
        }
        None => Err(ContentError::NoContent),
    }
}

/// Pure extraction step: `<p>` bodies to cleaned prose, or `None` when
/// the page has nothing worth reading.
fn extract_paragraphs(html: &str) -> Option<String> {
    let cleaned: Vec<String> = paragraph_re()
        .captures_iter(html)
        .filter_map(|cap| cap.get(1))
        .map(|body| clean_paragraph(body.as_str()))
        .filter(|text| text.chars().count() > MIN_PARAGRAPH_CHARS)
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let joined = cleaned.join("\n\n");
    if joined.chars().count() < MIN_CONTENT_CHARS {
        return None;
    }
    Some(joined)
}

fn clean_paragraph(body: &str) -> String {
    let text = tag_re().replace_all(body, "");
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .trim()
        .to_string()
}

async fn read_limited_text(
    response: reqwest::Response,
    limit: usize,
) -> Result<String, ContentError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ContentError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// ============================================================================
// Tests
// ============================================================================
