use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by a speech backend.
#[derive(Debug, Error)]
pub enum SpeechError {
    /// The backend cannot pause or resume an utterance in place
    #[error("Backend does not support pause/resume")]
    Unsupported,
    /// Failed to start or signal the synthesizer process
    #[error("Synthesizer process error: {0}")]
    Process(#[from] std::io::Error),
}

/// What happened to an utterance, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEventKind {
    /// Progress marker: the backend just spoke past this many characters
    /// counted from the start of the utterance text.
    Boundary(usize),
    /// The utterance played to its natural end.
    Done,
    /// The utterance was cut short by a stop request.
    Stopped,
    /// The backend failed mid-utterance.
    Error(String),
}

/// An utterance lifecycle event, tagged with the utterance id it belongs
/// to so listeners can discard reports from utterances they have already
/// abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechEvent {
    pub utterance: u64,
    pub kind: SpeechEventKind,
}

impl SpeechEvent {
    pub fn new(utterance: u64, kind: SpeechEventKind) -> Self {
        Self { utterance, kind }
    }
}

/// A speech backend: something that can turn one piece of text into audio
/// and report what became of it.
///
/// Backends differ in one capability that changes the caller's whole
/// pause strategy: some can truly freeze and unfreeze an utterance,
/// others can only kill it. `supports_pause` declares which kind this is,
/// probed once at startup rather than branched on per call. Backends
/// that return `false` must reject `pause` and `resume` with
/// [`SpeechError::Unsupported`]; callers are expected to approximate
/// pause by stopping and later re-speaking a suffix.
///
/// `speak` is fire-and-forget: it starts the utterance and returns, with
/// completion, interruption, and failure delivered asynchronously on the
/// provided channel, tagged with the caller's utterance id. At most one
/// utterance is audible at a time; starting a new one while another is
/// live is the caller's bug, so callers stop first.
pub trait SpeechDriver: Send {
    /// Begin speaking `text`, reporting lifecycle events for `utterance`
    /// on `events`.
    fn speak(
        &self,
        utterance: u64,
        text: &str,
        events: &mpsc::UnboundedSender<SpeechEvent>,
    ) -> Result<(), SpeechError>;

    /// Freeze the live utterance in place.
    fn pause(&self) -> Result<(), SpeechError>;

    /// Unfreeze a paused utterance.
    fn resume(&self) -> Result<(), SpeechError>;

    /// Cut the live utterance short. A no-op when nothing is speaking.
    fn stop(&self) -> Result<(), SpeechError>;

    /// Whether `pause`/`resume` work in place.
    fn supports_pause(&self) -> bool;
}
