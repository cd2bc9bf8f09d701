//! Controller state: the single source of truth for a session

use chrono::{DateTime, Utc};

use crate::reflection::TurnResult;
use crate::tone::Tone;

/// Where the controller is in the turn cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Not listening; waiting for warm-up or re-arm
    #[default]
    Idle,
    /// Capture running, nothing uncommitted
    Listening,
    /// Capture running with a buffered transcript and the silence timer armed
    Recording,
    /// Utterance sent to the reflection service
    Dispatching,
    /// Reply (or fallback) being played back
    Speaking,
    /// Transient failure, recovers on its own
    Error,
}

impl Phase {
    /// Label for logs and UI
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Recording => "recording",
            Self::Dispatching => "dispatching",
            Self::Speaking => "speaking",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recognition result as delivered by the capture source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub is_final: bool,
}

/// One continuous span of recognized speech
///
/// The capture source reports cumulative text, so the utterance text is
/// *replaced* by each fragment rather than appended to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    text: String,
    fragments: Vec<Fragment>,
    started_at: DateTime<Utc>,
}

impl Utterance {
    /// Start an empty utterance now
    #[must_use]
    pub fn new() -> Self {
        Self {
            text: String::new(),
            fragments: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Record a fragment; returns false if it carries the text already buffered
    pub fn update(&mut self, text: &str, is_final: bool) -> bool {
        if self.text == text {
            return false;
        }
        text.clone_into(&mut self.text);
        self.fragments.push(Fragment {
            text: text.to_string(),
            is_final,
        });
        true
    }

    /// Latest cumulative text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Every fragment received, oldest first
    #[must_use]
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// When the first fragment arrived
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Length in characters (not bytes)
    #[must_use]
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Whether the recognizer marked the latest fragment final
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.fragments.last().is_some_and(|f| f.is_final)
    }
}

impl Default for Utterance {
    fn default() -> Self {
        Self::new()
    }
}

/// A completed turn kept for mood history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRecord {
    pub text: String,
    pub tone: Tone,
    pub reply: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of everything a presentation layer needs
#[derive(Debug, Clone, Default)]
pub struct ControllerState {
    pub phase: Phase,
    pub utterance: Option<Utterance>,
    pub last_result: Option<TurnResult>,
    pub last_error: Option<String>,
    pub identity: Option<String>,
    pub history: Vec<TurnRecord>,
}

impl ControllerState {
    /// Buffered transcript text, if any
    #[must_use]
    pub fn transcript(&self) -> Option<&str> {
        self.utterance.as_ref().map(Utterance::text)
    }
}
