//! Core library for newsdeck, a terminal news reader with spoken playback.
//!
//! # Architecture
//!
//! - [`config`]: TOML configuration with env-var API key resolution
//! - [`feed`]: news API client with offline cache and rate-limit fallback
//! - [`storage`]: key-value persistence and the saved-articles list
//! - [`speech`]: text-to-speech drivers and the playback queue
//! - [`content`]: reader-view extraction for offline article text
//!
//! The binary in `main.rs` wires these together behind a CLI; everything
//! here is usable as a library and tested against in-memory stores and
//! scripted speech drivers.

pub mod config;
pub mod content;
pub mod feed;
pub mod speech;
pub mod storage;
