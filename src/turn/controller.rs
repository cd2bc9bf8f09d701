//! Turn-taking controller
//!
//! Coordinates one conversation session:
//!
//! ```text
//! capture ──► buffer transcript ──► silence ──► reflect ──► speak ──► re-arm
//!   ▲                                                                  │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A single task owns [`ControllerState`]. Adapters never touch it: capture
//! sources send events, and reflection/playback calls run on spawned tasks
//! that report back through a channel. Every late message is checked against
//! the session or turn it belongs to before it is allowed to change state.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::state::{ControllerState, Phase, TurnRecord, Utterance};
use crate::config::TurnTimings;
use crate::identity::IdentityStore;
use crate::reflection::{ReflectionClient, TurnResult};
use crate::voice::{
    CaptureEmitter, CaptureErrorKind, CaptureEvent, CaptureSource, PlaybackSink, SessionEvent,
};
use crate::{Error, Result};

/// Result of a spawned call, tagged with the turn that issued it
#[derive(Debug)]
enum Completion {
    Reflected { turn: u64, result: Result<TurnResult> },
    Spoken { turn: u64, result: Result<()> },
}

/// Observer/remote control for a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    state: watch::Receiver<ControllerState>,
    shutdown: CancellationToken,
}

impl ControllerHandle {
    /// Subscribe to state snapshots
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }

    /// Latest state snapshot
    #[must_use]
    pub fn snapshot(&self) -> ControllerState {
        self.state.borrow().clone()
    }

    /// Tear the session down: timers dropped, capture stopped, playback cancelled
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// The turn-taking state machine
pub struct TurnController {
    capture: Box<dyn CaptureSource>,
    playback: Arc<dyn PlaybackSink>,
    reflection: Arc<dyn ReflectionClient>,
    identity_store: Arc<dyn IdentityStore>,
    timings: TurnTimings,

    state: ControllerState,
    state_tx: watch::Sender<ControllerState>,
    shutdown: CancellationToken,

    capture_tx: mpsc::UnboundedSender<SessionEvent>,
    capture_rx: mpsc::UnboundedReceiver<SessionEvent>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,

    /// Capture session whose events are accepted
    active_session: Option<u64>,
    last_session: u64,
    listening: bool,

    /// Turn currently dispatching or speaking
    pending_turn: Option<u64>,
    last_turn: u64,
    speaking_fallback: bool,
    /// Last utterance that produced a reflection
    last_dispatched: Option<String>,
    speak_task: Option<JoinHandle<()>>,

    silence_deadline: Option<Instant>,
    warmup_deadline: Option<Instant>,
    rearm_deadline: Option<Instant>,
}

impl TurnController {
    /// Build a controller and the handle used to observe and stop it
    #[must_use]
    pub fn new(
        capture: Box<dyn CaptureSource>,
        playback: Arc<dyn PlaybackSink>,
        reflection: Arc<dyn ReflectionClient>,
        identity_store: Arc<dyn IdentityStore>,
        timings: TurnTimings,
    ) -> (Self, ControllerHandle) {
        let (state_tx, state_rx) = watch::channel(ControllerState::default());
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let handle = ControllerHandle {
            state: state_rx,
            shutdown: shutdown.clone(),
        };

        let controller = Self {
            capture,
            playback,
            reflection,
            identity_store,
            timings,
            state: ControllerState::default(),
            state_tx,
            shutdown,
            capture_tx,
            capture_rx,
            completion_tx,
            completion_rx,
            active_session: None,
            last_session: 0,
            listening: false,
            pending_turn: None,
            last_turn: 0,
            speaking_fallback: false,
            last_dispatched: None,
            speak_task: None,
            silence_deadline: None,
            warmup_deadline: None,
            rearm_deadline: None,
        };

        (controller, handle)
    }

    /// Run the session until [`ControllerHandle::shutdown`] is called
    pub async fn run(mut self) {
        self.state.identity = self.identity_store.get();
        self.warmup_deadline = Some(Instant::now() + self.timings.warmup);
        tracing::info!(
            has_identity = self.state.identity.is_some(),
            "turn controller started"
        );
        self.publish();

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                Some(completion) = self.completion_rx.recv() => self.on_completion(completion),
                Some((session, event)) = self.capture_rx.recv() => self.on_capture(session, event),
                () = sleep_until(deadline) => self.on_deadline(),
            }

            self.publish();
        }

        self.teardown();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.state.phase != phase {
            tracing::debug!(from = %self.state.phase, to = %phase, "phase change");
            self.state.phase = phase;
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.silence_deadline, self.warmup_deadline, self.rearm_deadline]
            .into_iter()
            .flatten()
            .min()
    }

    fn on_deadline(&mut self) {
        let now = Instant::now();

        if self.silence_deadline.is_some_and(|d| d <= now) {
            self.silence_deadline = None;
            self.on_silence();
        }
        if self.rearm_deadline.is_some_and(|d| d <= now) {
            self.rearm_deadline = None;
            self.on_rearm();
        }
        if self.warmup_deadline.is_some_and(|d| d <= now) {
            self.warmup_deadline = None;
            if self.pending_turn.is_none() && !self.listening {
                self.start_capture();
            }
        }
    }

    // --- capture ---------------------------------------------------------

    fn on_capture(&mut self, session: u64, event: CaptureEvent) {
        if self.active_session != Some(session) {
            tracing::trace!(session, ?event, "dropping event from stale capture session");
            return;
        }

        match event {
            CaptureEvent::ListeningChanged(true) => {
                self.listening = true;
                if self.state.phase == Phase::Idle {
                    self.set_phase(Phase::Listening);
                }
            }
            CaptureEvent::ListeningChanged(false) => {
                tracing::debug!(session, "capture source stopped listening");
                self.listening = false;
                self.active_session = None;
                if self.state.phase == Phase::Listening {
                    self.set_phase(Phase::Idle);
                    self.schedule_warmup();
                }
            }
            CaptureEvent::Transcript { text, is_final } => self.on_transcript(&text, is_final),
            CaptureEvent::Error(kind) => self.on_capture_error(&kind),
        }
    }

    fn on_transcript(&mut self, text: &str, is_final: bool) {
        if !matches!(self.state.phase, Phase::Listening | Phase::Recording) {
            tracing::trace!(phase = %self.state.phase, "ignoring transcript outside listening");
            return;
        }

        let text = text.trim();
        if text.is_empty() || self.state.transcript() == Some(text) {
            return;
        }

        if self.state.phase == Phase::Listening {
            self.state.utterance = Some(Utterance::new());
        }
        let utterance = self.state.utterance.get_or_insert_with(Utterance::new);
        utterance.update(text, is_final);

        tracing::trace!(chars = utterance.char_count(), is_final, "transcript updated");
        self.set_phase(Phase::Recording);
        self.silence_deadline = Some(Instant::now() + self.timings.silence);
    }

    fn on_capture_error(&mut self, kind: &CaptureErrorKind) {
        tracing::warn!(error = %kind, "capture failed, retrying after recovery delay");
        self.capture_failed(kind.to_string());
    }

    fn capture_failed(&mut self, message: String) {
        self.stop_capture();
        self.silence_deadline = None;
        self.state.utterance = None;
        self.state.last_error = Some(message);
        self.set_phase(Phase::Error);
        self.rearm_deadline = Some(Instant::now() + self.timings.recovery);
    }

    fn start_capture(&mut self) {
        if self.pending_turn.is_some() {
            return;
        }

        if self.active_session.is_some() && self.capture.is_active() {
            self.listening = true;
            self.set_phase(Phase::Listening);
            return;
        }

        self.last_session += 1;
        let session = self.last_session;
        let emitter = CaptureEmitter::new(session, self.capture_tx.clone());

        match self.capture.start(emitter) {
            Ok(()) => {
                self.active_session = Some(session);
                self.listening = true;
                self.set_phase(Phase::Listening);
                tracing::info!(session, "listening");
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to start capture");
                self.capture_failed(e.to_string());
            }
        }
    }

    fn stop_capture(&mut self) {
        if self.active_session.take().is_some() || self.capture.is_active() {
            self.capture.stop();
        }
        self.listening = false;
    }

    fn schedule_warmup(&mut self) {
        if self.warmup_deadline.is_none() && self.rearm_deadline.is_none() {
            self.warmup_deadline = Some(Instant::now() + self.timings.warmup);
        }
    }

    /// Phase to fall back to when an utterance is not dispatched
    fn settle_without_dispatch(&mut self) {
        if self.listening {
            self.set_phase(Phase::Listening);
        } else {
            self.set_phase(Phase::Idle);
            self.schedule_warmup();
        }
    }

    // --- dispatch --------------------------------------------------------

    fn on_silence(&mut self) {
        if self.state.phase != Phase::Recording {
            return;
        }

        let Some(utterance) = self.state.utterance.as_ref() else {
            self.settle_without_dispatch();
            return;
        };

        let text = utterance.text().to_string();
        let chars = utterance.char_count();

        if chars <= self.timings.min_chars {
            tracing::debug!(chars, "utterance too short, not dispatching");
            self.settle_without_dispatch();
            return;
        }

        if self.last_dispatched.as_deref() == Some(text.as_str()) {
            tracing::debug!("utterance already dispatched, discarding");
            self.state.utterance = None;
            self.settle_without_dispatch();
            return;
        }

        if self.pending_turn.is_some() {
            tracing::warn!("dispatch requested while a turn is pending");
            return;
        }

        self.dispatch(text);
    }

    fn dispatch(&mut self, text: String) {
        self.last_turn += 1;
        let turn = self.last_turn;

        self.pending_turn = Some(turn);
        self.set_phase(Phase::Dispatching);
        self.stop_capture();

        tracing::info!(turn, chars = text.chars().count(), "dispatching utterance");

        let client = Arc::clone(&self.reflection);
        let identity = self.state.identity.clone();
        let tx = self.completion_tx.clone();

        tokio::spawn(async move {
            let result = AssertUnwindSafe(client.reflect(&text, identity.as_deref()))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(Error::Reflection("reflection client panicked".to_string())));
            let _ = tx.send(Completion::Reflected { turn, result });
        });
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Reflected { turn, result } => self.on_reflected(turn, result),
            Completion::Spoken { turn, result } => self.on_spoken(turn, &result),
        }
    }

    fn on_reflected(&mut self, turn: u64, result: Result<TurnResult>) {
        if self.pending_turn != Some(turn) || self.state.phase != Phase::Dispatching {
            tracing::debug!(turn, "discarding reflection for superseded turn");
            return;
        }

        match result {
            Ok(result) if !result.reply.trim().is_empty() => {
                tracing::info!(turn, tone = %result.tone, "reflection received");
                self.update_identity(&result.identity);

                let text = self.state.transcript().unwrap_or_default().to_string();
                self.last_dispatched = Some(text.clone());
                self.state.history.push(TurnRecord {
                    text,
                    tone: result.tone,
                    reply: result.reply.clone(),
                    at: chrono::Utc::now(),
                });
                self.state.last_error = None;
                self.state.last_result = Some(result.clone());

                self.speak(turn, result.reply, false);
            }
            Ok(_) => self.reflection_failed(turn, &Error::Reflection("empty reply".to_string())),
            Err(e) => self.reflection_failed(turn, &e),
        }
    }

    fn reflection_failed(&mut self, turn: u64, error: &Error) {
        tracing::warn!(turn, error = %error, "reflection failed, speaking fallback");

        self.set_phase(Phase::Error);
        self.state.last_error = Some(format!("Couldn't reach the reflection service: {error}"));
        self.publish();

        let fallback = self.timings.fallback_reply.clone();
        self.speak(turn, fallback, true);
    }

    fn update_identity(&mut self, identity: &str) {
        if self.state.identity.as_deref() == Some(identity) {
            return;
        }

        if let Err(e) = self.identity_store.set(identity) {
            tracing::warn!(error = %e, "failed to persist identity token");
        }
        tracing::debug!("identity token updated");
        self.state.identity = Some(identity.to_string());
    }

    // --- playback --------------------------------------------------------

    fn speak(&mut self, turn: u64, text: String, fallback: bool) {
        self.speaking_fallback = fallback;
        self.set_phase(Phase::Speaking);

        let playback = Arc::clone(&self.playback);
        let tx = self.completion_tx.clone();

        self.speak_task = Some(tokio::spawn(async move {
            let result = AssertUnwindSafe(playback.speak(&text))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(Error::Playback("playback panicked".to_string())));
            let _ = tx.send(Completion::Spoken { turn, result });
        }));
    }

    fn on_spoken(&mut self, turn: u64, result: &Result<()>) {
        if self.pending_turn != Some(turn) || self.state.phase != Phase::Speaking {
            tracing::debug!(turn, "discarding playback result for superseded turn");
            return;
        }

        if let Err(e) = result {
            tracing::warn!(turn, error = %e, "playback failed, continuing");
        }

        self.pending_turn = None;
        self.set_phase(Phase::Idle);

        let delay = if self.speaking_fallback {
            self.timings.recovery
        } else {
            self.timings.rearm
        };
        self.rearm_deadline = Some(Instant::now() + delay);
    }

    fn on_rearm(&mut self) {
        self.state.utterance = None;
        self.state.last_error = None;
        self.warmup_deadline = None;
        if self.state.phase == Phase::Error {
            self.set_phase(Phase::Idle);
        }
        if self.listening {
            self.set_phase(Phase::Listening);
        } else {
            self.start_capture();
        }
    }

    fn teardown(&mut self) {
        self.silence_deadline = None;
        self.warmup_deadline = None;
        self.rearm_deadline = None;
        self.stop_capture();
        // A speak task that has not started yet has nothing for the sink to cancel
        if let Some(task) = self.speak_task.take() {
            task.abort();
        }
        self.playback.cancel();
        self.pending_turn = None;
        self.state.utterance = None;
        self.set_phase(Phase::Idle);
        self.publish();
        tracing::info!("turn controller stopped");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
