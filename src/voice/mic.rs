//! Microphone capture with cumulative re-transcription
//!
//! Audio is pulled from the default input device on a dedicated thread (the
//! cpal stream handle is not `Send`). A tokio task segments the samples by
//! energy and re-transcribes the whole open segment at a fixed interval, so
//! every transcript it reports is the full text of the utterance so far.
//! Segments split by a short pause are joined until quiet outlasts the
//! utterance gap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::task::JoinHandle;

use super::capture::{CaptureEmitter, CaptureSource, block_on_worker};
use super::segmenter::{SAMPLE_RATE, SegmentEvent, SpeechSegmenter, UtteranceTranscript};
use super::stt::SpeechToText;
use crate::{Error, Result};

/// How often captured samples are drained into the segmenter
const POLL_INTERVAL: Duration = Duration::from_millis(100);

type SampleBuffer = Arc<Mutex<Vec<f32>>>;

struct MicSession {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    task: JoinHandle<()>,
}

/// Captures speech from the default input device
pub struct MicCapture {
    stt: Arc<SpeechToText>,
    retranscribe_every: Duration,
    utterance_gap: Duration,
    session: Option<MicSession>,
}

impl MicCapture {
    /// Create a microphone source backed by `stt`
    #[must_use]
    pub fn new(stt: SpeechToText) -> Self {
        Self {
            stt: Arc::new(stt),
            retranscribe_every: Duration::from_secs(1),
            utterance_gap: Duration::from_secs(2),
            session: None,
        }
    }

    /// Quiet that ends an utterance; match the controller's silence window
    #[must_use]
    pub const fn with_utterance_gap(mut self, gap: Duration) -> Self {
        self.utterance_gap = gap;
        self
    }
}

impl CaptureSource for MicCapture {
    fn start(&mut self, emitter: CaptureEmitter) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }

        let buffer: SampleBuffer = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let thread = spawn_input_thread(Arc::clone(&buffer), Arc::clone(&stop))?;

        let task = tokio::spawn(transcribe_loop(
            buffer,
            Arc::clone(&self.stt),
            emitter,
            self.retranscribe_every,
            self.utterance_gap,
        ));

        self.session = Some(MicSession {
            stop,
            thread: Some(thread),
            task,
        });
        tracing::debug!("microphone capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop.store(true, Ordering::SeqCst);
            session.task.abort();
            if let Some(thread) = session.thread.take() {
                if block_on_worker(|| thread.join()).is_err() {
                    tracing::warn!("audio input thread panicked");
                }
            }
            tracing::debug!("microphone capture stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the input stream on its own thread and keep it alive until `stop`
fn spawn_input_thread(
    buffer: SampleBuffer,
    stop: Arc<AtomicBool>,
) -> Result<std::thread::JoinHandle<()>> {
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

    let thread = std::thread::spawn(move || {
        let stream = match open_input_stream(buffer) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        let _ = ready_tx.send(Ok(()));

        while !stop.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(50));
        }
        drop(stream);
    });

    block_on_worker(|| ready_rx.recv())
        .map_err(|_| Error::Capture("audio input thread exited".to_string()))??;
    Ok(thread)
}

fn open_input_stream(buffer: SampleBuffer) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        "audio input initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

async fn transcribe_loop(
    buffer: SampleBuffer,
    stt: Arc<SpeechToText>,
    emitter: CaptureEmitter,
    retranscribe_every: Duration,
    utterance_gap: Duration,
) {
    let mut segmenter = SpeechSegmenter::new();
    let mut utterance = UtteranceTranscript::new(utterance_gap);
    let mut since_transcript = Duration::ZERO;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    if !emitter.listening_changed(true) {
        return;
    }

    loop {
        ticker.tick().await;
        if emitter.is_closed() {
            return;
        }

        let chunk = std::mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner));
        if chunk.is_empty() {
            continue;
        }

        match segmenter.process(&chunk) {
            SegmentEvent::Quiet | SegmentEvent::Discarded => utterance.quiet(POLL_INTERVAL),
            SegmentEvent::Started => {
                utterance.speech();
                since_transcript = Duration::ZERO;
            }
            SegmentEvent::Continuing => {
                utterance.speech();
                since_transcript += POLL_INTERVAL;
                if since_transcript >= retranscribe_every {
                    since_transcript = Duration::ZERO;
                    if let Some(text) = transcribe(&stt, segmenter.segment()).await {
                        emitter.transcript(utterance.with_segment(&text), false);
                    }
                }
            }
            SegmentEvent::Ended => {
                let segment = segmenter.take_segment();
                if let Some(text) = transcribe(&stt, &segment).await {
                    emitter.transcript(utterance.commit(&text), true);
                }
            }
        }
    }
}

async fn transcribe(stt: &SpeechToText, samples: &[f32]) -> Option<String> {
    let wav = match samples_to_wav(samples, SAMPLE_RATE) {
        Ok(wav) => wav,
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode speech segment");
            return None;
        }
    };

    match stt.transcribe(wav).await {
        Ok(text) => Some(text).filter(|t| !t.trim().is_empty()),
        Err(e) => {
            tracing::warn!(error = %e, "transcription failed, keeping previous transcript");
            None
        }
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_to_wav_header() {
        let samples = vec![0.0, 0.5, -0.5, 1.0, -1.0];
        let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + samples.len() * 2);
    }
}
