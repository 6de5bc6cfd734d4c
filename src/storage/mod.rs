//! Persistence layer: a small key-value capability and the stores built
//! on it.
//!
//! Everything the app remembers between runs — cached feed pages, the
//! rate-limit window, saved articles — is a JSON string under a
//! deterministic key. [`KeyValueStore`] abstracts where those strings
//! live so the feed and storage logic can be exercised against
//! [`MemoryStore`] in tests while production uses [`JsonFileStore`].

mod kv;
mod saved;

pub use kv::{JsonFileStore, KeyValueStore, MemoryStore, StoreError};
pub use saved::SavedArticles;
