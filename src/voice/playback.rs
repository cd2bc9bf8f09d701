//! Speech playback contract and console playback

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Text-to-speech output
///
/// `speak` resolves when playback finishes, fails, or is cancelled. A
/// cancelled `speak` resolves with `Ok(())`. Starting a new `speak` while one
/// is active cancels the active one first, so audio never overlaps.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Speak `text`, returning once playback has settled
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or audio output fails
    async fn speak(&self, text: &str) -> Result<()>;

    /// Stop any in-progress playback immediately
    fn cancel(&self);
}

/// Serializes playback: one active utterance at a time
#[derive(Debug, Default)]
pub struct PlaybackGate {
    active: Mutex<Option<(u64, CancellationToken)>>,
    next_id: Mutex<u64>,
}

impl PlaybackGate {
    /// Create an idle gate
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one playback, cancelling whatever was playing before it
    ///
    /// The closure receives the token for this playback so blocking output
    /// loops can poll it. If the token fires first the playback future is
    /// dropped and `Ok(())` is returned.
    ///
    /// # Errors
    ///
    /// Returns whatever error the playback future produced
    pub async fn run<F, Fut>(&self, play: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        let (id, token) = self.begin();

        let result = tokio::select! {
            () = token.cancelled() => {
                tracing::debug!(playback = id, "playback cancelled");
                Ok(())
            }
            result = play(token.clone()) => result,
        };

        self.finish(id);
        result
    }

    /// Cancel the active playback, if any
    pub fn cancel(&self) {
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((_, token)) = active {
            token.cancel();
        }
    }

    /// Whether a playback is currently running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn begin(&self) -> (u64, CancellationToken) {
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        let token = CancellationToken::new();

        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((id, token.clone()));
        if let Some((prev_id, prev)) = previous {
            tracing::debug!(playback = prev_id, "superseded by new playback");
            prev.cancel();
        }

        (id, token)
    }

    fn finish(&self, id: u64) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|(active_id, _)| *active_id == id) {
            *active = None;
        }
    }
}

/// Prints replies and holds for roughly the time it would take to say them
pub struct ConsolePlayback {
    gate: PlaybackGate,
    per_word: Duration,
}

impl ConsolePlayback {
    /// Create a console sink with a speaking pace of ~150 words per minute
    #[must_use]
    pub fn new() -> Self {
        Self::with_pace(Duration::from_millis(400))
    }

    /// Create a console sink with a custom per-word duration
    #[must_use]
    pub fn with_pace(per_word: Duration) -> Self {
        Self {
            gate: PlaybackGate::new(),
            per_word,
        }
    }

    fn duration_for(&self, text: &str) -> Duration {
        let words = u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX);
        self.per_word.saturating_mul(words)
    }
}

impl Default for ConsolePlayback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaybackSink for ConsolePlayback {
    async fn speak(&self, text: &str) -> Result<()> {
        let duration = self.duration_for(text);
        self.gate
            .run(|_| async move {
                println!("🔊 {text}");
                tokio::time::sleep(duration).await;
                Ok(())
            })
            .await
    }

    fn cancel(&self) {
        self.gate.cancel();
    }
}
