use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::speech::driver::{SpeechDriver, SpeechError, SpeechEvent, SpeechEventKind};

/// One recorded `speak` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
}

/// A speech backend that makes no sound: it records every call and lets
/// the test script the utterance lifecycle by hand.
///
/// Clones share state, so a test can hand one clone to the player and
/// keep another to inspect recorded utterances and emit events. Whether
/// the backend claims in-place pause is chosen at construction, which is
/// how both pause strategies get exercised against the same double.
///
/// The `emit_*` helpers address the most recently spoken utterance and
/// panic if nothing has been spoken yet — a scripting mistake in the
/// test, not a runtime condition.
#[derive(Clone)]
pub struct ScriptedDriver {
    inner: Arc<Inner>,
}

struct Inner {
    supports_pause: bool,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    utterances: Vec<Utterance>,
    events: Option<mpsc::UnboundedSender<SpeechEvent>>,
    pause_calls: usize,
    resume_calls: usize,
    stop_calls: usize,
}

impl ScriptedDriver {
    pub fn new(supports_pause: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                supports_pause,
                state: Mutex::new(State::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn utterances(&self) -> Vec<Utterance> {
        self.state().utterances.clone()
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.state().utterances.iter().map(|u| u.text.clone()).collect()
    }

    pub fn last_utterance(&self) -> Option<Utterance> {
        self.state().utterances.last().cloned()
    }

    pub fn pause_calls(&self) -> usize {
        self.state().pause_calls
    }

    pub fn resume_calls(&self) -> usize {
        self.state().resume_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.state().stop_calls
    }

    /// Deliver an event for an explicit utterance id, live or abandoned.
    pub fn emit_for(&self, utterance: u64, kind: SpeechEventKind) {
        let state = self.state();
        if let Some(events) = &state.events {
            let _ = events.send(SpeechEvent::new(utterance, kind));
        }
    }

    fn last_id(&self) -> u64 {
        self.state()
            .utterances
            .last()
            .map(|u| u.id)
            .expect("ScriptedDriver: no utterance has been spoken yet")
    }

    pub fn emit_boundary(&self, char_index: usize) {
        self.emit_for(self.last_id(), SpeechEventKind::Boundary(char_index));
    }

    pub fn emit_done(&self) {
        self.emit_for(self.last_id(), SpeechEventKind::Done);
    }

    pub fn emit_stopped(&self) {
        self.emit_for(self.last_id(), SpeechEventKind::Stopped);
    }

    pub fn emit_error(&self, message: &str) {
        self.emit_for(self.last_id(), SpeechEventKind::Error(message.to_string()));
    }
}

impl SpeechDriver for ScriptedDriver {
    fn speak(
        &self,
        utterance: u64,
        text: &str,
        events: &mpsc::UnboundedSender<SpeechEvent>,
    ) -> Result<(), SpeechError> {
        let mut state = self.state();
        state.utterances.push(Utterance {
            id: utterance,
            text: text.to_string(),
        });
        state.events = Some(events.clone());
        Ok(())
    }

    fn pause(&self) -> Result<(), SpeechError> {
        self.state().pause_calls += 1;
        if self.inner.supports_pause {
            Ok(())
        } else {
            Err(SpeechError::Unsupported)
        }
    }

    fn resume(&self) -> Result<(), SpeechError> {
        self.state().resume_calls += 1;
        if self.inner.supports_pause {
            Ok(())
        } else {
            Err(SpeechError::Unsupported)
        }
    }

    fn stop(&self) -> Result<(), SpeechError> {
        self.state().stop_calls += 1;
        Ok(())
    }

    fn supports_pause(&self) -> bool {
        self.inner.supports_pause
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_utterances_in_order() {
        let driver = ScriptedDriver::new(false);
        let (tx, _rx) = mpsc::unbounded_channel();

        driver.speak(1, "first", &tx).unwrap();
        driver.speak(2, "second", &tx).unwrap();

        assert_eq!(driver.spoken_texts(), vec!["first", "second"]);
        assert_eq!(driver.last_utterance().unwrap().id, 2);
    }

    #[tokio::test]
    async fn test_emits_into_the_latest_channel() {
        let driver = ScriptedDriver::new(false);
        let (tx, mut rx) = mpsc::unbounded_channel();

        driver.speak(3, "text", &tx).unwrap();
        driver.emit_boundary(5);
        driver.emit_done();
        driver.emit_for(1, SpeechEventKind::Stopped);

        assert_eq!(
            rx.recv().await.unwrap(),
            SpeechEvent::new(3, SpeechEventKind::Boundary(5))
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SpeechEvent::new(3, SpeechEventKind::Done)
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SpeechEvent::new(1, SpeechEventKind::Stopped)
        );
    }

    #[tokio::test]
    async fn test_counts_control_calls() {
        let driver = ScriptedDriver::new(true);
        driver.pause().unwrap();
        driver.resume().unwrap();
        driver.stop().unwrap();
        driver.stop().unwrap();

        assert_eq!(driver.pause_calls(), 1);
        assert_eq!(driver.resume_calls(), 1);
        assert_eq!(driver.stop_calls(), 2);
    }
}
