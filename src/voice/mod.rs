//! Voice adapters
//!
//! Capture sources feed recognized speech into the turn controller; playback
//! sinks speak its replies. Microphone and speaker adapters need the `audio`
//! feature; console adapters work anywhere.

mod capture;
mod playback;
mod segmenter;
mod stt;
mod tts;

#[cfg(feature = "audio")]
mod mic;
#[cfg(feature = "audio")]
mod speaker;

pub use capture::{
    CaptureEmitter, CaptureErrorKind, CaptureEvent, CaptureSource, ConsoleCapture, SessionEvent,
};
pub use playback::{ConsolePlayback, PlaybackGate, PlaybackSink};
pub use segmenter::{
    SAMPLE_RATE, SegmentEvent, SpeechSegmenter, UtteranceTranscript, calculate_energy,
};
pub use stt::SpeechToText;
pub use tts::TextToSpeech;

#[cfg(feature = "audio")]
pub use mic::{MicCapture, samples_to_wav};
#[cfg(feature = "audio")]
pub use speaker::SpeakerPlayback;
