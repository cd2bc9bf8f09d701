//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reflect_gateway::llm::{Reflection, ReflectionEngine};
use reflect_gateway::voice::{CaptureEmitter, CaptureErrorKind, CaptureSource, PlaybackSink};
use reflect_gateway::{
    ControllerHandle, DbPool, Error, MemoryIdentityStore, ReflectionClient, Result, Tone,
    TurnController, TurnResult, TurnTimings, db,
};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Create a test user in the database
pub fn create_test_user(db: &DbPool) -> reflect_gateway::db::User {
    let repo = reflect_gateway::db::UserRepo::new(db.clone());
    repo.create().expect("failed to create test user")
}

// --- capture -------------------------------------------------------------

#[derive(Default)]
struct CaptureShared {
    emitter: Option<CaptureEmitter>,
    starts: usize,
    stops: usize,
    fail_next_start: bool,
}

/// Capture source driven by the test through a [`CaptureProbe`]
pub struct ScriptedCapture {
    shared: Arc<Mutex<CaptureShared>>,
}

/// Test-side handle to a [`ScriptedCapture`]
#[derive(Clone)]
pub struct CaptureProbe {
    shared: Arc<Mutex<CaptureShared>>,
}

impl ScriptedCapture {
    pub fn new() -> (Self, CaptureProbe) {
        let shared = Arc::new(Mutex::new(CaptureShared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            CaptureProbe { shared },
        )
    }
}

impl CaptureSource for ScriptedCapture {
    fn start(&mut self, emitter: CaptureEmitter) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        if shared.fail_next_start {
            shared.fail_next_start = false;
            return Err(Error::Capture("no microphone".to_string()));
        }
        if shared.emitter.is_some() {
            return Ok(());
        }
        shared.starts += 1;
        emitter.listening_changed(true);
        shared.emitter = Some(emitter);
        Ok(())
    }

    fn stop(&mut self) {
        let mut shared = self.shared.lock().unwrap();
        if let Some(emitter) = shared.emitter.take() {
            shared.stops += 1;
            emitter.listening_changed(false);
        }
    }

    fn is_active(&self) -> bool {
        self.shared.lock().unwrap().emitter.is_some()
    }
}

impl CaptureProbe {
    /// Deliver a cumulative transcript; returns false when capture is not running
    pub fn transcript(&self, text: &str, is_final: bool) -> bool {
        self.shared
            .lock()
            .unwrap()
            .emitter
            .as_ref()
            .is_some_and(|e| e.transcript(text, is_final))
    }

    /// Report a recognition failure
    pub fn error(&self, kind: CaptureErrorKind) -> bool {
        self.shared
            .lock()
            .unwrap()
            .emitter
            .as_ref()
            .is_some_and(|e| e.error(kind))
    }

    /// Emitter of the current session, for replaying stale events later
    pub fn emitter(&self) -> Option<CaptureEmitter> {
        self.shared.lock().unwrap().emitter.clone()
    }

    pub fn fail_next_start(&self) {
        self.shared.lock().unwrap().fail_next_start = true;
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().unwrap().emitter.is_some()
    }

    pub fn starts(&self) -> usize {
        self.shared.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.shared.lock().unwrap().stops
    }
}

// --- playback ------------------------------------------------------------

/// Playback sink that records what it was asked to say
pub struct RecordingPlayback {
    spoken: Mutex<Vec<String>>,
    cancels: Mutex<usize>,
    finished: Mutex<usize>,
    duration: Duration,
    fail: bool,
}

impl RecordingPlayback {
    pub fn new(duration: Duration) -> Self {
        Self {
            spoken: Mutex::new(Vec::new()),
            cancels: Mutex::new(0),
            finished: Mutex::new(0),
            duration,
            fail: false,
        }
    }

    /// A sink whose every playback fails after `duration`
    pub fn failing(duration: Duration) -> Self {
        Self {
            fail: true,
            ..Self::new(duration)
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> usize {
        *self.cancels.lock().unwrap()
    }

    /// Playbacks that ran to the end
    pub fn finished(&self) -> usize {
        *self.finished.lock().unwrap()
    }
}

#[async_trait]
impl PlaybackSink for RecordingPlayback {
    async fn speak(&self, text: &str) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        tokio::time::sleep(self.duration).await;
        *self.finished.lock().unwrap() += 1;
        if self.fail {
            return Err(Error::Playback("speaker unplugged".to_string()));
        }
        Ok(())
    }

    fn cancel(&self) {
        *self.cancels.lock().unwrap() += 1;
    }
}

// --- reflection ----------------------------------------------------------

/// Reflection client answering from a queue of canned results
pub struct ScriptedReflection {
    script: Mutex<VecDeque<Result<TurnResult>>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
    latency: Duration,
}

impl ScriptedReflection {
    pub fn new(latency: Duration) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            latency,
        }
    }

    /// Queue a successful answer
    pub fn reply(self, tone: Tone, reply: &str, identity: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(TurnResult {
            tone,
            reply: reply.to_string(),
            identity: identity.to_string(),
        }));
        self
    }

    /// Queue a failure
    pub fn fail(self, error: Error) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    /// Every `(text, identity)` the client was called with
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReflectionClient for ScriptedReflection {
    async fn reflect(&self, text: &str, identity: Option<&str>) -> Result<TurnResult> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), identity.map(ToString::to_string)));
        tokio::time::sleep(self.latency).await;

        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Reflection("script exhausted".to_string())))
    }
}

/// Reflection engine returning a fixed answer, or failing when none is set
pub struct StubEngine {
    answer: Option<Reflection>,
    calls: Mutex<Vec<String>>,
}

impl StubEngine {
    pub fn answering(tone: Tone, response: &str) -> Self {
        Self {
            answer: Some(Reflection {
                tone,
                response: response.to_string(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReflectionEngine for StubEngine {
    async fn reflect(&self, text: &str) -> Result<Reflection> {
        self.calls.lock().unwrap().push(text.to_string());
        self.answer
            .clone()
            .ok_or_else(|| Error::Llm("model unavailable".to_string()))
    }
}

// --- controller harness --------------------------------------------------

/// A running controller wired to test doubles
pub struct Harness {
    pub handle: ControllerHandle,
    pub capture: CaptureProbe,
    pub playback: Arc<RecordingPlayback>,
    pub reflection: Arc<ScriptedReflection>,
    pub identity: Arc<MemoryIdentityStore>,
    pub task: tokio::task::JoinHandle<()>,
}

impl Harness {
    pub fn start(reflection: ScriptedReflection, playback: RecordingPlayback) -> Self {
        Self::start_with(reflection, playback, None)
    }

    pub fn start_with(
        reflection: ScriptedReflection,
        playback: RecordingPlayback,
        identity: Option<&str>,
    ) -> Self {
        let (capture, probe) = ScriptedCapture::new();
        let playback = Arc::new(playback);
        let reflection = Arc::new(reflection);
        let identity = Arc::new(MemoryIdentityStore::new(identity.map(ToString::to_string)));

        let (controller, handle) = TurnController::new(
            Box::new(capture),
            Arc::clone(&playback) as Arc<dyn PlaybackSink>,
            Arc::clone(&reflection) as Arc<dyn ReflectionClient>,
            Arc::clone(&identity) as Arc<dyn reflect_gateway::IdentityStore>,
            TurnTimings::default(),
        );
        let task = tokio::spawn(controller.run());

        Self {
            handle,
            capture: probe,
            playback,
            reflection,
            identity,
            task,
        }
    }

    /// Say `text` as a single cumulative fragment
    pub fn say(&self, text: &str) {
        assert!(self.capture.transcript(text, false), "capture is not running");
    }
}

/// Advance paused time, letting every task that becomes ready run
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
