//! Read-aloud playback over pluggable speech backends.
//!
//! - [`driver`] - The [`SpeechDriver`] capability and its event types
//! - [`process`] - Backend that shells out to an external synthesizer
//! - [`scripted`] - Silent recording backend for tests
//! - [`narrator`] - The queue/state machine that drives a backend
//!
//! The split exists because pause support is a platform property, not a
//! runtime condition: the narrator asks the driver once whether it can
//! pause in place and commits to either delegating or approximating with
//! restart-from-offset.

mod driver;
mod narrator;
mod process;
mod scripted;

pub use driver::{SpeechDriver, SpeechError, SpeechEvent, SpeechEventKind};
pub use narrator::{Narrator, PlaybackState, DEFAULT_MAX_UTTERANCE_CHARS};
pub use process::ProcessDriver;
pub use scripted::{ScriptedDriver, Utterance};
