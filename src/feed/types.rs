use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Category catalog
// ============================================================================

/// Pseudo-category meaning "no category filter". Never sent to the API as a
/// literal filter value.
pub const ALL_CATEGORY: &str = "all";

/// The category rail the feed UI offers. The fetch path accepts arbitrary
/// category strings; this list exists for display and validation.
pub const CATEGORIES: [&str; 7] = [
    ALL_CATEGORY,
    "general",
    "business",
    "technology",
    "sports",
    "entertainment",
    "politics",
];

// ============================================================================
// Article
// ============================================================================

/// One article as returned by the news API.
///
/// The upstream schema is loose: identifiers arrive as `article_id` or `id`
/// (string or number), titles as `title`/`headline`/`name`, bodies as
/// `description`/`summary`/`content`/`desc`, links as `url`/`link`. Every
/// known field is optional and any field this struct does not name is kept
/// in `extra`, so an article written back out (saved list, feed cache)
/// keeps its original shape. The one normalization applied: numeric
/// identifier fields are stored as their decimal string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Article {
    #[serde(default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    #[serde(default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    #[serde(default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,

    /// Unrecognized fields, preserved verbatim for round-tripping.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Article {
    /// Stable identity used for saved-article dedup and removal:
    /// `article_id`, then `id`, then the title as a last resort. `None`
    /// means the article carries nothing to identify it by; callers fall
    /// back to positional handling.
    pub fn identity(&self) -> Option<&str> {
        non_empty(&self.article_id)
            .or_else(|| non_empty(&self.id))
            .or_else(|| non_empty(&self.title))
    }

    /// First non-empty of the title alias fields.
    pub fn display_title(&self) -> Option<&str> {
        non_empty(&self.title)
            .or_else(|| non_empty(&self.headline))
            .or_else(|| non_empty(&self.name))
    }

    /// First non-empty of the description alias fields.
    pub fn display_description(&self) -> Option<&str> {
        non_empty(&self.description)
            .or_else(|| non_empty(&self.summary))
            .or_else(|| non_empty(&self.content))
            .or_else(|| non_empty(&self.desc))
    }

    /// Best link for the article (`url` wins over `link`).
    pub fn display_url(&self) -> Option<&str> {
        non_empty(&self.url).or_else(|| non_empty(&self.link))
    }

    /// The text handed to the speech capability: `"{title}. {description}"`,
    /// with missing halves rendered empty rather than skipped so the
    /// separator stays predictable for offset tracking.
    pub fn spoken_text(&self) -> String {
        format!(
            "{}. {}",
            self.display_title().unwrap_or(""),
            self.display_description().unwrap_or("")
        )
    }

    /// Case-insensitive substring match against the resolved title.
    /// An empty query matches every article.
    pub fn matches_query(&self, query: &str) -> bool {
        if query.is_empty() {
            return true;
        }
        let needle = query.to_lowercase();
        self.display_title()
            .map(|t| t.to_lowercase().contains(&needle))
            .unwrap_or(false)
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

/// Accepts a JSON string or number and yields its string form; null and
/// structured values read as absent. Keeps the client resilient to the
/// API's habit of switching identifier types between plans.
fn stringish<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_numeric_id_becomes_string() {
        let article: Article =
            serde_json::from_str(r#"{"id": 42, "title": "Numbers"}"#).unwrap();
        assert_eq!(article.id.as_deref(), Some("42"));
        assert_eq!(article.identity(), Some("42"));
    }

    #[test]
    fn test_identity_prefers_article_id_over_id_and_title() {
        let article: Article = serde_json::from_str(
            r#"{"article_id": "abc", "id": "def", "title": "T"}"#,
        )
        .unwrap();
        assert_eq!(article.identity(), Some("abc"));

        let article: Article =
            serde_json::from_str(r#"{"id": "def", "title": "T"}"#).unwrap();
        assert_eq!(article.identity(), Some("def"));

        let article: Article = serde_json::from_str(r#"{"title": "T"}"#).unwrap();
        assert_eq!(article.identity(), Some("T"));

        let article: Article = serde_json::from_str(r#"{"score": 3}"#).unwrap();
        assert_eq!(article.identity(), None);
    }

    #[test]
    fn test_alias_chains() {
        let article: Article = serde_json::from_str(
            r#"{"headline": "H", "summary": "S"}"#,
        )
        .unwrap();
        assert_eq!(article.display_title(), Some("H"));
        assert_eq!(article.display_description(), Some("S"));
        assert_eq!(article.spoken_text(), "H. S");

        // Empty strings are skipped, not taken.
        let article: Article = serde_json::from_str(
            r#"{"title": "", "name": "N", "description": "", "desc": "D"}"#,
        )
        .unwrap();
        assert_eq!(article.display_title(), Some("N"));
        assert_eq!(article.display_description(), Some("D"));
    }

    #[test]
    fn test_unknown_fields_round_trip() {
        let raw = r#"{"article_id":"1","title":"A","source_priority":7,"creator":["x"]}"#;
        let article: Article = serde_json::from_str(raw).unwrap();
        assert_eq!(article.extra.get("source_priority"), Some(&Value::from(7)));

        let back = serde_json::to_value(&article).unwrap();
        assert_eq!(back["source_priority"], Value::from(7));
        assert_eq!(back["creator"], serde_json::json!(["x"]));
        assert_eq!(back["article_id"], Value::from("1"));
        // Absent known fields stay absent.
        assert!(back.get("link").is_none());
    }

    #[test]
    fn test_matches_query() {
        let article: Article =
            serde_json::from_str(r#"{"title": "Rust Hits the Headlines"}"#).unwrap();
        assert!(article.matches_query("rust"));
        assert!(article.matches_query("HEADLINES"));
        assert!(article.matches_query(""));
        assert!(!article.matches_query("python"));

        let untitled: Article = serde_json::from_str(r#"{"id": "9"}"#).unwrap();
        assert!(untitled.matches_query(""));
        assert!(!untitled.matches_query("anything"));
    }

    #[test]
    fn test_null_fields_read_as_absent() {
        let article: Article =
            serde_json::from_str(r#"{"title": null, "description": null}"#).unwrap();
        assert_eq!(article.display_title(), None);
        assert_eq!(article.spoken_text(), ". ");
    }
}
