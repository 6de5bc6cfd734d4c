//! Full-article content retrieval for offline reading.

mod reader;

pub use reader::{download_reader_view, ContentError};
