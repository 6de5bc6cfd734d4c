use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::feed::Article;
use crate::speech::driver::{SpeechDriver, SpeechEvent, SpeechEventKind};

/// Longest text handed to the backend in one utterance. Longer articles
/// are spoken as a chain of segments.
pub const DEFAULT_MAX_UTTERANCE_CHARS: usize = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

/// Read-aloud controller: one current article, a FIFO of articles to
/// speak next, and a [`SpeechDriver`] doing the actual talking.
///
/// The spoken text is `"{title}. {description}"`. Because backends have
/// no native queueing across articles — and may not even accept long
/// texts — the narrator drives everything off utterance completion
/// events: a finished segment chains the next segment of the same
/// article, a finished article pulls the next one off the queue, and an
/// empty queue drops back to idle.
///
/// Pause follows the driver's declared capability. Drivers with in-place
/// pause get `pause`/`resume` delegated; the rest get the utterance
/// killed on pause and, on resume, re-spoken from the last boundary the
/// backend reported. Offsets are tracked as absolute character positions
/// in the full text, so resuming works across segment borders and
/// repeated pauses — at worst it repeats or skips the few words between
/// boundary reports.
///
/// Events are pulled, not pushed: the owner decides when to call
/// [`drain_events`](Narrator::drain_events) or
/// [`run_until_idle`](Narrator::run_until_idle), keeping the state
/// machine single-threaded and deterministic under test. Every event
/// carries the id of the utterance that produced it; events from
/// utterances that were replaced or cancelled are discarded.
pub struct Narrator {
    driver: Box<dyn SpeechDriver>,
    events_tx: mpsc::UnboundedSender<SpeechEvent>,
    events_rx: mpsc::UnboundedReceiver<SpeechEvent>,
    queue: VecDeque<Article>,
    current: Option<Article>,
    text: String,
    text_chars: usize,
    /// Absolute char offset where the live utterance's segment starts.
    utterance_base: usize,
    /// Char length of the live utterance's segment.
    utterance_chars: usize,
    /// Absolute char offset of the latest boundary report.
    last_boundary: usize,
    live_utterance: Option<u64>,
    next_utterance: u64,
    state: PlaybackState,
    max_utterance_chars: usize,
}

impl Narrator {
    pub fn new(driver: Box<dyn SpeechDriver>) -> Self {
        Self::with_max_chars(driver, DEFAULT_MAX_UTTERANCE_CHARS)
    }

    pub fn with_max_chars(driver: Box<dyn SpeechDriver>, max_utterance_chars: usize) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            driver,
            events_tx,
            events_rx,
            queue: VecDeque::new(),
            current: None,
            text: String::new(),
            text_chars: 0,
            utterance_base: 0,
            utterance_chars: 0,
            last_boundary: 0,
            live_utterance: None,
            next_utterance: 0,
            state: PlaybackState::Idle,
            max_utterance_chars: max_utterance_chars.max(1),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn current(&self) -> Option<&Article> {
        self.current.as_ref()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Start speaking `article` immediately, cancelling whatever was
    /// playing. The pending queue is untouched.
    pub fn play(&mut self, article: Article) {
        self.cancel_utterance();
        let text = article.spoken_text();
        self.text_chars = text.chars().count();
        self.text = text;
        self.current = Some(article);
        self.last_boundary = 0;
        self.state = PlaybackState::Playing;
        self.speak_from(0);
    }

    /// Append to the pending queue without affecting current playback.
    pub fn enqueue(&mut self, article: Article) {
        self.queue.push_back(article);
    }

    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        if self.driver.supports_pause() {
            match self.driver.pause() {
                Ok(()) => self.state = PlaybackState::Paused,
                Err(e) => {
                    tracing::warn!(error = %e, "Pause failed; stopping");
                    self.stop();
                }
            }
        } else {
            // Kill the utterance but keep our place in the text.
            self.cancel_utterance();
            self.state = PlaybackState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state != PlaybackState::Paused {
            return;
        }
        if self.driver.supports_pause() {
            match self.driver.resume() {
                Ok(()) => self.state = PlaybackState::Playing,
                Err(e) => {
                    tracing::warn!(error = %e, "Resume failed; stopping");
                    self.stop();
                }
            }
        } else if self.current.is_some() {
            self.state = PlaybackState::Playing;
            self.speak_from(self.last_boundary.min(self.text_chars));
        }
    }

    /// Cancel playback and forget the current article. The pending queue
    /// survives a stop.
    pub fn stop(&mut self) {
        self.cancel_utterance();
        self.current = None;
        self.text.clear();
        self.text_chars = 0;
        self.last_boundary = 0;
        self.state = PlaybackState::Idle;
    }

    /// Speak the queue head, or stop if the queue is empty. Invoked
    /// automatically on natural completion; also callable as a manual
    /// skip.
    pub fn play_next(&mut self) {
        match self.queue.pop_front() {
            Some(next) => self.play(next),
            None => self.stop(),
        }
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
        self.stop();
    }

    /// Apply every event the backend has already delivered, without
    /// waiting for more.
    pub fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.process(event);
        }
    }

    /// Wait for one backend event and apply it. Returns `false` only if
    /// the event channel is gone.
    pub async fn process_next_event(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.process(event);
                true
            }
            None => false,
        }
    }

    /// Pump events while playback is active: segments chain, queued
    /// articles follow, and the call returns once nothing is left to
    /// speak. Ends in [`Idle`](PlaybackState::Idle) when everything was
    /// spoken, or [`Paused`](PlaybackState::Paused) when the backend
    /// failed or was interrupted and is holding position for a resume.
    /// A paused narrator produces no further events, so looping past
    /// that state would wait forever.
    pub async fn run_until_idle(&mut self) {
        while self.state == PlaybackState::Playing {
            if !self.process_next_event().await {
                break;
            }
        }
    }

    fn cancel_utterance(&mut self) {
        if self.live_utterance.take().is_some() {
            if let Err(e) = self.driver.stop() {
                tracing::debug!(error = %e, "Stop request to speech backend failed");
            }
        }
    }

    /// Start the segment of `text` beginning at the `start`-th character.
    fn speak_from(&mut self, start: usize) {
        let start = start.min(self.text_chars);
        let (segment, segment_chars) = segment_at(&self.text, start, self.max_utterance_chars);
        self.utterance_base = start;
        self.utterance_chars = segment_chars;
        self.next_utterance += 1;
        let id = self.next_utterance;
        self.live_utterance = Some(id);

        if let Err(e) = self.driver.speak(id, segment, &self.events_tx) {
            tracing::warn!(error = %e, "Speech backend refused utterance");
            self.live_utterance = None;
            self.state = PlaybackState::Paused;
        }
    }

    fn process(&mut self, event: SpeechEvent) {
        if Some(event.utterance) != self.live_utterance {
            tracing::trace!(utterance = event.utterance, "Discarding stale speech event");
            return;
        }
        match event.kind {
            SpeechEventKind::Boundary(index) => {
                self.last_boundary = (self.utterance_base + index).min(self.text_chars);
            }
            SpeechEventKind::Done => {
                self.live_utterance = None;
                // A completion racing a pause must not advance anything.
                if self.state == PlaybackState::Paused {
                    return;
                }
                let end = self.utterance_base + self.utterance_chars;
                if end < self.text_chars {
                    self.last_boundary = end;
                    self.speak_from(end);
                } else {
                    self.play_next();
                }
            }
            SpeechEventKind::Stopped => {
                // Interrupted from outside; hold position so the user can
                // resume.
                self.live_utterance = None;
                if self.state == PlaybackState::Playing {
                    self.state = PlaybackState::Paused;
                }
            }
            SpeechEventKind::Error(message) => {
                tracing::warn!(error = %message, "Speech backend error");
                self.live_utterance = None;
                if self.state == PlaybackState::Playing {
                    self.state = PlaybackState::Paused;
                }
            }
        }
    }
}

/// Byte index of the `chars`-th character, or the string's end when out
/// of range. Always lands on a char boundary.
fn byte_at_char(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(s.len())
}

/// Slice at most `max_chars` characters out of `text` starting at the
/// `start_chars`-th character. Returns the segment and its length in
/// characters.
fn segment_at(text: &str, start_chars: usize, max_chars: usize) -> (&str, usize) {
    let start = byte_at_char(text, start_chars);
    let tail = &text[start..];
    let mut count = 0;
    for (offset, _) in tail.char_indices() {
        if count == max_chars {
            return (&tail[..offset], count);
        }
        count += 1;
    }
    (tail, count)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::scripted::ScriptedDriver;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn article(title: &str, description: &str) -> Article {
        serde_json::from_value(serde_json::json!({
            "article_id": title,
            "title": title,
            "description": description,
        }))
        .unwrap()
    }

    fn narrator(supports_pause: bool) -> (ScriptedDriver, Narrator) {
        let driver = ScriptedDriver::new(supports_pause);
        let narrator = Narrator::new(Box::new(driver.clone()));
        (driver, narrator)
    }

    #[test]
    fn test_play_speaks_title_then_description() {
        let (driver, mut narrator) = narrator(false);
        narrator.play(article("Monsoon update", "Rains expected."));

        assert_eq!(driver.spoken_texts(), vec!["Monsoon update. Rains expected."]);
        assert_eq!(narrator.state(), PlaybackState::Playing);
        assert!(narrator.current().is_some());
    }

    #[test]
    fn test_empty_article_still_speaks_separator() {
        let (driver, mut narrator) = narrator(false);
        narrator.play(Article::default());

        assert_eq!(driver.spoken_texts(), vec![". "]);
    }

    #[test]
    fn test_enqueue_does_not_autoplay() {
        let (driver, mut narrator) = narrator(false);
        narrator.enqueue(article("A", "a"));

        assert_eq!(narrator.state(), PlaybackState::Idle);
        assert_eq!(narrator.queue_len(), 1);
        assert!(driver.utterances().is_empty());
    }

    #[test]
    fn test_play_replaces_current_playback() {
        let (driver, mut narrator) = narrator(false);
        narrator.play(article("First", "one"));
        narrator.play(article("Second", "two"));

        assert_eq!(driver.stop_calls(), 1);
        assert_eq!(driver.last_utterance().unwrap().text, "Second. two");

        // The first utterance's completion arrives late and must change
        // nothing.
        driver.emit_for(1, SpeechEventKind::Done);
        narrator.drain_events();
        assert_eq!(narrator.state(), PlaybackState::Playing);
        assert_eq!(driver.utterances().len(), 2);
        assert_eq!(
            narrator.current().unwrap().display_title(),
            Some("Second")
        );
    }

    #[test]
    fn test_natural_completion_advances_queue() {
        let (driver, mut narrator) = narrator(false);
        narrator.play(article("A", "alpha"));
        narrator.enqueue(article("B", "beta"));

        driver.emit_done();
        narrator.drain_events();

        assert_eq!(narrator.current().unwrap().display_title(), Some("B"));
        assert_eq!(narrator.queue_len(), 0);
        assert_eq!(driver.last_utterance().unwrap().text, "B. beta");
        assert_eq!(narrator.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_completion_with_empty_queue_goes_idle() {
        let (driver, mut narrator) = narrator(false);
        narrator.play(article("A", "alpha"));

        driver.emit_done();
        narrator.drain_events();

        assert_eq!(narrator.state(), PlaybackState::Idle);
        assert!(narrator.current().is_none());
    }

    #[test]
    fn test_done_while_paused_does_not_advance() {
        let (driver, mut narrator) = narrator(true);
        narrator.play(article("A", "alpha"));
        narrator.enqueue(article("B", "beta"));
        narrator.pause();

        // Completion racing the pause on a true-pause platform.
        driver.emit_done();
        narrator.drain_events();

        assert_eq!(narrator.state(), PlaybackState::Paused);
        assert_eq!(narrator.current().unwrap().display_title(), Some("A"));
        assert_eq!(narrator.queue_len(), 1);
    }

    #[test]
    fn test_pause_delegates_when_supported() {
        let (driver, mut narrator) = narrator(true);
        narrator.play(article("A", "alpha"));

        narrator.pause();
        assert_eq!(driver.pause_calls(), 1);
        assert_eq!(driver.stop_calls(), 0);
        assert_eq!(narrator.state(), PlaybackState::Paused);

        narrator.resume();
        assert_eq!(driver.resume_calls(), 1);
        assert_eq!(narrator.state(), PlaybackState::Playing);
        // No re-speak: the utterance was frozen, not killed.
        assert_eq!(driver.utterances().len(), 1);
    }

    #[test]
    fn test_pause_without_support_restarts_from_boundary() {
        let (driver, mut narrator) = narrator(false);
        narrator.play(article("Hello", "world news."));
        // Spoken text: "Hello. world news."

        driver.emit_boundary(7);
        narrator.drain_events();
        narrator.pause();

        assert_eq!(driver.stop_calls(), 1);
        assert_eq!(narrator.state(), PlaybackState::Paused);
        assert!(narrator.current().is_some());

        narrator.resume();
        assert_eq!(narrator.state(), PlaybackState::Playing);
        assert_eq!(driver.last_utterance().unwrap().text, "world news.");
    }

    #[test]
    fn test_resume_offset_is_clamped_to_text_length() {
        let (driver, mut narrator) = narrator(false);
        narrator.play(article("Tiny", "bit"));

        driver.emit_boundary(10_000);
        narrator.drain_events();
        narrator.pause();
        narrator.resume();

        assert_eq!(driver.last_utterance().unwrap().text, "");
        assert_eq!(narrator.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_second_resume_does_not_rewind() {
        let (driver, mut narrator) = narrator(false);
        narrator.play(article("Hello", "world news."));
        // "Hello. world news."

        driver.emit_boundary(7);
        narrator.drain_events();
        narrator.pause();
        narrator.resume(); // speaking "world news."

        // Boundary relative to the resumed utterance: 6 chars in.
        driver.emit_boundary(6);
        narrator.drain_events();
        narrator.pause();
        narrator.resume();

        assert_eq!(driver.last_utterance().unwrap().text, "news.");
    }

    #[test]
    fn test_long_text_chains_segments() {
        let driver = ScriptedDriver::new(false);
        let mut narrator = Narrator::with_max_chars(Box::new(driver.clone()), 5);
        narrator.play(article("abcdefghijk", ""));
        narrator.enqueue(article("B", "beta"));
        // Spoken text: "abcdefghijk. " (13 chars)

        assert_eq!(driver.last_utterance().unwrap().text, "abcde");

        driver.emit_done();
        narrator.drain_events();
        // Mid-article completion continues the same article.
        assert_eq!(driver.last_utterance().unwrap().text, "fghij");
        assert_eq!(narrator.current().unwrap().display_title(), Some("abcdefghijk"));
        assert_eq!(narrator.queue_len(), 1);

        driver.emit_done();
        narrator.drain_events();
        assert_eq!(driver.last_utterance().unwrap().text, "k. ");

        driver.emit_done();
        narrator.drain_events();
        // Only now does the queue advance.
        assert_eq!(narrator.current().unwrap().display_title(), Some("B"));
    }

    #[test]
    fn test_boundary_across_segments_resumes_absolutely() {
        let driver = ScriptedDriver::new(false);
        let mut narrator = Narrator::with_max_chars(Box::new(driver.clone()), 5);
        narrator.play(article("abcdefghijk", ""));
        // Segments: "abcde", "fghij", "k. "

        driver.emit_done();
        narrator.drain_events();
        driver.emit_boundary(2); // 2 chars into the second segment = char 7
        narrator.drain_events();

        narrator.pause();
        narrator.resume();

        assert_eq!(driver.last_utterance().unwrap().text, "hijk.");
    }

    #[test]
    fn test_stop_goes_idle_but_keeps_queue() {
        let (driver, mut narrator) = narrator(false);
        narrator.play(article("A", "alpha"));
        narrator.enqueue(article("B", "beta"));

        narrator.stop();
        assert_eq!(narrator.state(), PlaybackState::Idle);
        assert!(narrator.current().is_none());
        assert_eq!(narrator.queue_len(), 1);

        // The killed utterance's events are stale now.
        driver.emit_done();
        narrator.drain_events();
        assert_eq!(narrator.state(), PlaybackState::Idle);
        assert_eq!(narrator.queue_len(), 1);
    }

    #[test]
    fn test_clear_queue_empties_and_stops() {
        let (_, mut narrator) = narrator(false);
        narrator.play(article("A", "alpha"));
        narrator.enqueue(article("B", "beta"));
        narrator.enqueue(article("C", "gamma"));

        narrator.clear_queue();
        assert_eq!(narrator.queue_len(), 0);
        assert_eq!(narrator.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_play_next_pops_head_in_order() {
        let (driver, mut narrator) = narrator(false);
        narrator.enqueue(article("A", "alpha"));
        narrator.enqueue(article("B", "beta"));

        narrator.play_next();
        assert_eq!(narrator.current().unwrap().display_title(), Some("A"));
        assert_eq!(narrator.queue_len(), 1);
        assert_eq!(driver.last_utterance().unwrap().text, "A. alpha");
    }

    #[test]
    fn test_play_next_with_empty_queue_stops() {
        let (_, mut narrator) = narrator(false);
        narrator.play(article("A", "alpha"));

        narrator.play_next();
        assert_eq!(narrator.state(), PlaybackState::Idle);
        assert!(narrator.current().is_none());
    }

    #[test]
    fn test_error_event_halts_but_keeps_position() {
        let (driver, mut narrator) = narrator(false);
        narrator.play(article("A", "alpha"));

        driver.emit_error("engine crashed");
        narrator.drain_events();

        assert!(!narrator.is_playing());
        assert_eq!(narrator.state(), PlaybackState::Paused);
        assert!(narrator.current().is_some());
    }

    #[test]
    fn test_external_stop_becomes_pause() {
        let (driver, mut narrator) = narrator(false);
        narrator.play(article("A", "alpha"));

        driver.emit_stopped();
        narrator.drain_events();

        assert_eq!(narrator.state(), PlaybackState::Paused);
        assert!(narrator.current().is_some());
    }

    proptest! {
        #[test]
        fn prop_segments_cover_text_exactly(text in ".*", max in 1usize..8) {
            let total = text.chars().count();
            let mut rebuilt = String::new();
            let mut start = 0;
            loop {
                let (segment, chars) = segment_at(&text, start, max);
                prop_assert!(chars <= max);
                rebuilt.push_str(segment);
                start += chars;
                if chars == 0 {
                    break;
                }
            }
            prop_assert_eq!(rebuilt, text);
            prop_assert_eq!(start, total);
        }

        #[test]
        fn prop_byte_at_char_lands_on_boundaries(text in ".*", at in 0usize..64) {
            let byte = byte_at_char(&text, at);
            prop_assert!(text.is_char_boundary(byte));
            let _ = &text[byte..];
        }
    }
}
