//! Energy-based speech segmentation for microphone capture
//!
//! Splits a sample stream into speech segments so the microphone source can
//! re-transcribe the growing segment and report cumulative transcripts.
//! A pause long enough to close a segment can still be shorter than the
//! controller's silence window, so [`UtteranceTranscript`] stitches the
//! segments of one utterance back together.

use std::time::Duration;

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech worth transcribing (0.3 seconds)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Silence that ends a segment (0.8 seconds)
const SILENCE_SAMPLES: usize = 12800;

/// What a chunk of samples did to the current segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEvent {
    /// Nothing in progress
    Quiet,
    /// Speech began with this chunk
    Started,
    /// Segment still open
    Continuing,
    /// Segment closed by trailing silence and is long enough to transcribe
    Ended,
    /// Segment closed but was too short to be speech
    Discarded,
}

/// Accumulates samples of one speech segment at a time
#[derive(Debug, Default)]
pub struct SpeechSegmenter {
    in_speech: bool,
    buffer: Vec<f32>,
    silence_counter: usize,
}

impl SpeechSegmenter {
    /// Create an idle segmenter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of samples
    pub fn process(&mut self, samples: &[f32]) -> SegmentEvent {
        let is_speech = calculate_energy(samples) > ENERGY_THRESHOLD;

        if !self.in_speech {
            if !is_speech {
                return SegmentEvent::Quiet;
            }
            self.in_speech = true;
            self.buffer.clear();
            self.buffer.extend_from_slice(samples);
            self.silence_counter = 0;
            tracing::trace!("speech started");
            return SegmentEvent::Started;
        }

        self.buffer.extend_from_slice(samples);
        if is_speech {
            self.silence_counter = 0;
        } else {
            self.silence_counter += samples.len();
        }

        if self.silence_counter <= SILENCE_SAMPLES {
            return SegmentEvent::Continuing;
        }

        self.in_speech = false;
        if self.buffer.len() - self.silence_counter > MIN_SPEECH_SAMPLES {
            tracing::debug!(samples = self.buffer.len(), "speech segment complete");
            SegmentEvent::Ended
        } else {
            tracing::trace!("segment too short, discarding");
            self.buffer.clear();
            SegmentEvent::Discarded
        }
    }

    /// Samples of the current (or just ended) segment
    #[must_use]
    pub fn segment(&self) -> &[f32] {
        &self.buffer
    }

    /// Take the segment samples, leaving the segmenter idle
    pub fn take_segment(&mut self) -> Vec<f32> {
        self.in_speech = false;
        self.silence_counter = 0;
        std::mem::take(&mut self.buffer)
    }

    /// Whether a segment is open
    #[must_use]
    pub const fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Drop any partial segment
    pub fn reset(&mut self) {
        self.in_speech = false;
        self.buffer.clear();
        self.silence_counter = 0;
    }
}

/// Joins the transcripts of consecutive segments into one utterance
///
/// Closed segments are committed; the open segment's latest transcript is
/// appended on every report. Quiet lasting `gap` ends the utterance.
#[derive(Debug)]
pub struct UtteranceTranscript {
    committed: String,
    gap: Duration,
    quiet_for: Duration,
}

impl UtteranceTranscript {
    /// Start an empty utterance that ends after `gap` of quiet
    #[must_use]
    pub const fn new(gap: Duration) -> Self {
        Self {
            committed: String::new(),
            gap,
            quiet_for: Duration::ZERO,
        }
    }

    /// Full text so far with the open segment's transcript appended
    #[must_use]
    pub fn with_segment(&self, segment_text: &str) -> String {
        join(&self.committed, segment_text)
    }

    /// Commit a closed segment's transcript, returning the full text
    pub fn commit(&mut self, segment_text: &str) -> String {
        self.committed = join(&self.committed, segment_text);
        self.quiet_for = Duration::ZERO;
        self.committed.clone()
    }

    /// Speech was heard
    pub const fn speech(&mut self) {
        self.quiet_for = Duration::ZERO;
    }

    /// `elapsed` passed without speech
    pub fn quiet(&mut self, elapsed: Duration) {
        self.quiet_for += elapsed;
        if self.quiet_for >= self.gap && !self.committed.is_empty() {
            tracing::trace!("utterance gap reached, starting over");
            self.committed.clear();
        }
    }

    /// Text of the closed segments
    #[must_use]
    pub fn committed(&self) -> &str {
        &self.committed
    }
}

fn join(head: &str, tail: &str) -> String {
    match (head.trim(), tail.trim()) {
        ("", tail) => tail.to_string(),
        (head, "") => head.to_string(),
        (head, tail) => format!("{head} {tail}"),
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn tone(duration_secs: f32) -> Vec<f32> {
        let n = (SAMPLE_RATE as f32 * duration_secs) as usize;
        (0..n)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / SAMPLE_RATE as f32).sin())
            .collect()
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn silence(duration_secs: f32) -> Vec<f32> {
        vec![0.0; (SAMPLE_RATE as f32 * duration_secs) as usize]
    }

    #[test]
    fn test_energy_calculation() {
        assert!(calculate_energy(&silence(0.01)) < 0.001);
        assert!(calculate_energy(&[0.5f32; 100]) > 0.4);
        assert!(calculate_energy(&[]) < f32::EPSILON);
    }

    #[test]
    fn test_segment_lifecycle() {
        let mut seg = SpeechSegmenter::new();

        assert_eq!(seg.process(&silence(0.1)), SegmentEvent::Quiet);
        assert_eq!(seg.process(&tone(0.5)), SegmentEvent::Started);
        assert_eq!(seg.process(&tone(0.3)), SegmentEvent::Continuing);
        assert_eq!(seg.process(&silence(0.5)), SegmentEvent::Continuing);
        assert_eq!(seg.process(&silence(0.5)), SegmentEvent::Ended);

        let samples = seg.take_segment();
        assert!(samples.len() > MIN_SPEECH_SAMPLES);
        assert!(!seg.in_speech());
    }

    #[test]
    fn test_short_blip_is_discarded() {
        let mut seg = SpeechSegmenter::new();

        assert_eq!(seg.process(&tone(0.05)), SegmentEvent::Started);
        assert_eq!(seg.process(&silence(1.0)), SegmentEvent::Discarded);
        assert!(seg.segment().is_empty());
    }

    #[test]
    fn test_short_pause_keeps_earlier_clause() {
        let mut seg = SpeechSegmenter::new();
        let mut utterance = UtteranceTranscript::new(Duration::from_secs(2));
        let chunk = Duration::from_millis(100);
        let mut reports = Vec::new();

        // Speech, a 1s pause (closes the segment), then more speech
        let stream = [tone(1.0), silence(1.0), tone(0.5)];
        for samples in stream.iter().flat_map(|s| s.chunks(1600)) {
            match seg.process(samples) {
                SegmentEvent::Quiet | SegmentEvent::Discarded => utterance.quiet(chunk),
                SegmentEvent::Started | SegmentEvent::Continuing if seg.segment().len() > 4800 => {
                    utterance.speech();
                    let heard = if utterance.committed().is_empty() {
                        "I went for a walk"
                    } else {
                        "and it started raining"
                    };
                    reports.push(utterance.with_segment(heard));
                }
                SegmentEvent::Started | SegmentEvent::Continuing => utterance.speech(),
                SegmentEvent::Ended => {
                    seg.take_segment();
                    reports.push(utterance.commit("I went for a walk"));
                }
            }
        }

        assert!(reports.contains(&"I went for a walk".to_string()));
        assert_eq!(
            reports.last().unwrap(),
            "I went for a walk and it started raining"
        );
    }

    #[test]
    fn test_long_quiet_starts_new_utterance() {
        let mut utterance = UtteranceTranscript::new(Duration::from_secs(2));

        assert_eq!(utterance.commit("first thought"), "first thought");
        utterance.quiet(Duration::from_millis(1500));
        assert_eq!(utterance.with_segment("still going"), "first thought still going");

        utterance.quiet(Duration::from_millis(600));
        assert_eq!(utterance.committed(), "");
        assert_eq!(utterance.with_segment("a new topic"), "a new topic");
    }

    #[test]
    fn test_speech_resets_quiet_time() {
        let mut utterance = UtteranceTranscript::new(Duration::from_secs(2));

        utterance.commit("one");
        utterance.quiet(Duration::from_millis(1500));
        utterance.speech();
        utterance.quiet(Duration::from_millis(1500));
        assert_eq!(utterance.commit("two"), "one two");
    }

    #[test]
    fn test_speech_resets_silence() {
        let mut seg = SpeechSegmenter::new();

        seg.process(&tone(0.5));
        seg.process(&silence(0.6));
        seg.process(&tone(0.2));
        assert_eq!(seg.process(&silence(0.6)), SegmentEvent::Continuing);
        assert!(seg.in_speech());
    }
}
