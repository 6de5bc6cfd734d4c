use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::speech::driver::{SpeechDriver, SpeechError, SpeechEvent, SpeechEventKind};

/// Speech backend that shells out to an external synthesizer (espeak-ng
/// by default), one process per utterance.
///
/// The process model dictates the capability surface: a child can be
/// killed but not frozen, so `supports_pause` is `false` and callers fall
/// back to restart-from-offset pause. Each `speak` hands its child to a
/// reaper task that waits for exit and reports `Done`, `Error`, or —
/// when the kill signal wins — `Stopped`. External synthesizers expose
/// no progress stream, so this driver never emits `Boundary` events.
pub struct ProcessDriver {
    command: String,
    args: Vec<String>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProcessDriver {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            kill: Mutex::new(None),
        }
    }

    fn take_kill(&self) -> Option<oneshot::Sender<()>> {
        match self.kill.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn store_kill(&self, tx: oneshot::Sender<()>) {
        match self.kill.lock() {
            Ok(mut guard) => *guard = Some(tx),
            Err(poisoned) => *poisoned.into_inner() = Some(tx),
        }
    }
}

impl SpeechDriver for ProcessDriver {
    fn speak(
        &self,
        utterance: u64,
        text: &str,
        events: &mpsc::UnboundedSender<SpeechEvent>,
    ) -> Result<(), SpeechError> {
        // Replacing the kill handle drops the previous receiver, which
        // reads as a kill signal to any still-running utterance.
        if let Some(previous) = self.take_kill() {
            let _ = previous.send(());
        }

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let (kill_tx, mut kill_rx) = oneshot::channel();
        self.store_kill(kill_tx);

        let events = events.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let kind = match status {
                        Ok(s) if s.success() => SpeechEventKind::Done,
                        Ok(s) => SpeechEventKind::Error(format!("synthesizer exited with {s}")),
                        Err(e) => SpeechEventKind::Error(e.to_string()),
                    };
                    let _ = events.send(SpeechEvent::new(utterance, kind));
                }
                _ = &mut kill_rx => {
                    if let Err(e) = child.start_kill() {
                        tracing::debug!(error = %e, "Kill signal to synthesizer failed");
                    }
                    let _ = child.wait().await;
                    let _ = events.send(SpeechEvent::new(utterance, SpeechEventKind::Stopped));
                }
            }
        });

        tracing::debug!(utterance = utterance, command = %self.command, "Synthesizer started");
        Ok(())
    }

    fn pause(&self) -> Result<(), SpeechError> {
        Err(SpeechError::Unsupported)
    }

    fn resume(&self) -> Result<(), SpeechError> {
        Err(SpeechError::Unsupported)
    }

    fn stop(&self) -> Result<(), SpeechError> {
        if let Some(kill) = self.take_kill() {
            let _ = kill.send(());
        }
        Ok(())
    }

    fn supports_pause(&self) -> bool {
        false
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<SpeechEvent>) -> SpeechEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no event within 2s")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_natural_exit_reports_done() {
        let driver = ProcessDriver::new("true", vec![]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        driver.speak(7, "hello", &tx).unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event.utterance, 7);
        assert_eq!(event.kind, SpeechEventKind::Done);
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_error() {
        let driver = ProcessDriver::new("false", vec![]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        driver.speak(1, "hello", &tx).unwrap();

        match next_event(&mut rx).await.kind {
            SpeechEventKind::Error(_) => {}
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stop_reports_stopped() {
        let driver = ProcessDriver::new("sleep", vec!["5".to_string()]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        driver.speak(1, "ignored", &tx).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.stop().unwrap();

        assert_eq!(next_event(&mut rx).await.kind, SpeechEventKind::Stopped);
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_speak() {
        let driver = ProcessDriver::new("/definitely/not/a/synthesizer", vec![]);
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(matches!(
            driver.speak(1, "hello", &tx),
            Err(SpeechError::Process(_))
        ));
    }

    #[tokio::test]
    async fn test_pause_is_unsupported() {
        let driver = ProcessDriver::new("true", vec![]);
        assert!(!driver.supports_pause());
        assert!(matches!(driver.pause(), Err(SpeechError::Unsupported)));
        assert!(matches!(driver.resume(), Err(SpeechError::Unsupported)));
    }
}
