//! Emotional tone labels attached to each turn

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Tone detected for an utterance
///
/// The set is open on the wire: any label this crate does not know about
/// degrades to [`Tone::Neutral`] instead of failing the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Calm,
    Excited,
    Sad,
    #[default]
    Neutral,
    Angry,
    Anxious,
    Hopeful,
}

impl Tone {
    /// All known tones, in display order
    pub const ALL: [Self; 7] = [
        Self::Calm,
        Self::Excited,
        Self::Sad,
        Self::Neutral,
        Self::Angry,
        Self::Anxious,
        Self::Hopeful,
    ];

    /// Wire/storage label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Calm => "calm",
            Self::Excited => "excited",
            Self::Sad => "sad",
            Self::Neutral => "neutral",
            Self::Angry => "angry",
            Self::Anxious => "anxious",
            Self::Hopeful => "hopeful",
        }
    }

    /// Parse a label, falling back to `Neutral` for anything unrecognized
    #[must_use]
    pub fn parse_lenient(label: &str) -> Self {
        let normalized = label.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|tone| tone.as_str() == normalized)
            .unwrap_or_else(|| {
                tracing::debug!(label, "unrecognized tone, using neutral");
                Self::Neutral
            })
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Tone {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&label))
    }
}
