//! Speech capture contract and console capture
//!
//! A capture source delivers *cumulative* transcripts: every
//! [`CaptureEvent::Transcript`] carries the full text recognized for the
//! current utterance so far, never a delta.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::Result;

/// Event emitted by a capture source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Recognition started or ended
    ListeningChanged(bool),
    /// Full recognized text for the current utterance
    Transcript { text: String, is_final: bool },
    /// Recognition failed
    Error(CaptureErrorKind),
}

/// Capture failure classes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureErrorKind {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no speech engine available")]
    NoEngine,
    #[error("speech engine error: {0}")]
    Engine(String),
}

/// Capture event tagged with the session that produced it
pub type SessionEvent = (u64, CaptureEvent);

/// Handle a capture source uses to report events for one session
///
/// Each call to [`CaptureSource::start`] gets a fresh emitter. Events from a
/// session the consumer no longer tracks are dropped on the receiving side,
/// so a source never has to worry about stale listeners after a restart.
#[derive(Debug, Clone)]
pub struct CaptureEmitter {
    session: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl CaptureEmitter {
    /// Create an emitter for a session
    #[must_use]
    pub const fn new(session: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    /// Create an emitter together with its receiving end
    #[must_use]
    pub fn channel(session: u64) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(session, tx), rx)
    }

    /// Session this emitter reports for
    #[must_use]
    pub const fn session(&self) -> u64 {
        self.session
    }

    /// Report a listening state change
    ///
    /// Returns false once nobody is receiving.
    pub fn listening_changed(&self, listening: bool) -> bool {
        self.emit(CaptureEvent::ListeningChanged(listening))
    }

    /// Report the cumulative transcript of the current utterance
    pub fn transcript(&self, text: impl Into<String>, is_final: bool) -> bool {
        self.emit(CaptureEvent::Transcript {
            text: text.into(),
            is_final,
        })
    }

    /// Report a recognition failure
    pub fn error(&self, kind: CaptureErrorKind) -> bool {
        self.emit(CaptureEvent::Error(kind))
    }

    /// Whether the receiving side has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn emit(&self, event: CaptureEvent) -> bool {
        self.tx.send((self.session, event)).is_ok()
    }
}

/// A continuous, interim-results speech recognition stream
pub trait CaptureSource: Send {
    /// Begin a recognition session reporting through `emitter`
    ///
    /// Starting an already active source is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if recognition cannot be started
    fn start(&mut self, emitter: CaptureEmitter) -> Result<()>;

    /// End the current session, if any
    fn stop(&mut self);

    /// Whether a session is currently running
    fn is_active(&self) -> bool;
}

type LineReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Typed-text capture for headless sessions
///
/// Each input line is replayed word by word as growing interim transcripts,
/// then once more as a final transcript, the way a browser recognizer
/// refines its hypothesis while someone is talking.
pub struct ConsoleCapture {
    reader: Arc<Mutex<LineReader>>,
    word_interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl ConsoleCapture {
    /// Capture from standard input
    #[must_use]
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }

    /// Capture from any line-oriented reader
    #[must_use]
    pub fn from_reader(reader: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Arc::new(Mutex::new(Box::new(reader))),
            word_interval: Duration::from_millis(150),
            task: None,
        }
    }

    /// Override the delay between interim transcripts
    #[must_use]
    pub const fn with_word_interval(mut self, interval: Duration) -> Self {
        self.word_interval = interval;
        self
    }
}

impl CaptureSource for ConsoleCapture {
    fn start(&mut self, emitter: CaptureEmitter) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }

        let reader = Arc::clone(&self.reader);
        let interval = self.word_interval;

        self.task = Some(tokio::spawn(async move {
            emitter.listening_changed(true);
            let mut reader = reader.lock().await;
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if !replay_line(&emitter, line.trim(), interval).await {
                            return;
                        }
                    }
                    Err(e) => {
                        emitter.error(CaptureErrorKind::Engine(e.to_string()));
                        return;
                    }
                }
            }

            tracing::debug!(session = emitter.session(), "console capture reached end of input");
            emitter.listening_changed(false);
        }));

        tracing::debug!("console capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("console capture stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ConsoleCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Emit growing prefixes of `line`, then the whole line as final
async fn replay_line(emitter: &CaptureEmitter, line: &str, interval: Duration) -> bool {
    if line.is_empty() {
        return true;
    }

    let words: Vec<&str> = line.split_whitespace().collect();
    for end in 1..words.len() {
        if !emitter.transcript(words[..end].join(" "), false) {
            return false;
        }
        tokio::time::sleep(interval).await;
    }

    emitter.transcript(words.join(" "), true)
}

/// Run blocking device work without stalling the other tasks on this worker
///
/// `block_in_place` is only available on the multi-threaded runtime; a
/// current-thread runtime (or no runtime) runs `f` inline.
#[cfg_attr(not(feature = "audio"), allow(dead_code))]
pub(crate) fn block_on_worker<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect_transcripts(
        rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Vec<(String, bool)> {
        let mut transcripts = Vec::new();
        while let Some((_, event)) = rx.recv().await {
            match event {
                CaptureEvent::Transcript { text, is_final } => transcripts.push((text, is_final)),
                CaptureEvent::ListeningChanged(false) => break,
                _ => {}
            }
        }
        transcripts
    }

    #[tokio::test(start_paused = true)]
    async fn test_console_capture_is_cumulative() {
        let input: &[u8] = b"I feel really anxious\n";
        let mut capture = ConsoleCapture::from_reader(input);
        let (emitter, mut rx) = CaptureEmitter::channel(7);

        capture.start(emitter).unwrap();
        let transcripts = collect_transcripts(&mut rx).await;

        assert_eq!(
            transcripts,
            vec![
                ("I".to_string(), false),
                ("I feel".to_string(), false),
                ("I feel really".to_string(), false),
                ("I feel really anxious".to_string(), true),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_tagged_with_session() {
        let input: &[u8] = b"hello\n";
        let mut capture = ConsoleCapture::from_reader(input);
        let (emitter, mut rx) = CaptureEmitter::channel(42);

        capture.start(emitter).unwrap();
        let (session, event) = rx.recv().await.unwrap();
        assert_eq!(session, 42);
        assert_eq!(event, CaptureEvent::ListeningChanged(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_lines_are_skipped() {
        let input: &[u8] = b"\n   \nokay then\n";
        let mut capture = ConsoleCapture::from_reader(input);
        let (emitter, mut rx) = CaptureEmitter::channel(1);

        capture.start(emitter).unwrap();
        let transcripts = collect_transcripts(&mut rx).await;
        assert_eq!(transcripts.last().unwrap(), &("okay then".to_string(), true));
        assert_eq!(transcripts.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_then_restart() {
        let input: &[u8] = b"";
        let mut capture = ConsoleCapture::from_reader(input);
        let (emitter, _rx) = CaptureEmitter::channel(1);

        capture.start(emitter).unwrap();
        capture.stop();
        assert!(!capture.is_active());

        let (emitter, mut rx) = CaptureEmitter::channel(2);
        capture.start(emitter).unwrap();
        let (session, _) = rx.recv().await.unwrap();
        assert_eq!(session, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_blocking_work_hands_off_the_worker() {
        let (tx, rx) = std::sync::mpsc::channel();

        // The only worker blocks until a task queued behind it runs.
        let waiter =
            tokio::spawn(async move { block_on_worker(|| rx.recv_timeout(Duration::from_secs(5))) });
        let sender = tokio::spawn(async move { tx.send(()) });

        assert!(waiter.await.unwrap().is_ok());
        assert!(sender.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_blocking_work_runs_inline_on_current_thread() {
        let value = block_on_worker(|| 7);
        assert_eq!(value, 7);
    }

    #[test]
    fn test_blocking_work_without_runtime() {
        assert_eq!(block_on_worker(|| "done"), "done");
    }
}
