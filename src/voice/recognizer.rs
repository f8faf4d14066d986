//! Microphone-backed speech recognition
//!
//! Records one utterance from the default input device, ending it on
//! trailing silence, then transcribes it with Whisper.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::capture::SpeechEngine;
use super::microphone::{MicInput, input_available, samples_to_wav};
use super::stt::SpeechToText;
use super::utterance::UtteranceDetector;
use crate::{Error, Result};

/// Longest wait for the next buffer before checking stop and the deadline
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Speech engine recording from the local microphone
pub struct MicrophoneRecognizer {
    stt: Option<Arc<SpeechToText>>,
    max_utterance: Duration,
}

impl MicrophoneRecognizer {
    /// Create a recognizer; without an STT client it reports unsupported
    #[must_use]
    pub fn new(stt: Option<SpeechToText>, max_utterance: Duration) -> Self {
        Self {
            stt: stt.map(Arc::new),
            max_utterance,
        }
    }
}

#[async_trait]
impl SpeechEngine for MicrophoneRecognizer {
    fn is_supported(&self) -> bool {
        self.stt.is_some() && input_available()
    }

    async fn recognize(&self) -> Result<String> {
        let stt = self
            .stt
            .as_ref()
            .ok_or_else(|| Error::Capability("no speech-to-text provider configured".to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let _halt = StopOnDrop(Arc::clone(&stop));
        let max = self.max_utterance;

        let (samples, rate) = tokio::task::spawn_blocking(move || record_utterance(&stop, max))
            .await
            .map_err(|e| Error::Capture(format!("recording thread failed: {e}")))??;

        let wav = samples_to_wav(&samples, rate)?;
        let text = stt
            .transcribe(&wav)
            .await
            .map_err(|e| Error::Capture(format!("transcription failed: {e}")))?;

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(Error::Capture("no speech detected".to_string()));
        }
        Ok(text)
    }
}

/// Stops the recording thread when the recognizing future is dropped
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Open the microphone and record one utterance at the device rate
fn record_utterance(stop: &AtomicBool, max: Duration) -> Result<(Vec<f32>, u32)> {
    let mic = MicInput::open().map_err(|e| Error::Capability(e.to_string()))?;
    let rate = mic.sample_rate();
    let mut detector = UtteranceDetector::for_sample_rate(rate);

    tracing::debug!(max_secs = max.as_secs(), rate, "recording utterance");
    let samples = listen(mic.frames(), &mut detector, stop, max)?;
    tracing::debug!(samples = samples.len(), "utterance recorded");
    Ok((samples, rate))
}

/// Feed buffers to `detector` until it hears a complete utterance, `max`
/// elapses, or `stop` is set
fn listen(
    frames: &Receiver<Vec<f32>>,
    detector: &mut UtteranceDetector,
    stop: &AtomicBool,
    max: Duration,
) -> Result<Vec<f32>> {
    let started = Instant::now();

    loop {
        if stop.load(Ordering::Acquire) {
            return Err(Error::Capture("recording aborted".to_string()));
        }

        match frames.recv_timeout(POLL_INTERVAL) {
            Ok(buffer) => {
                if detector.process(&buffer) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::Capture("microphone stream closed".to_string()));
            }
        }

        if started.elapsed() >= max {
            if detector.has_speech() {
                tracing::debug!("utterance cut at maximum length");
                break;
            }
            return Err(Error::Capture("no speech detected".to_string()));
        }
    }

    Ok(detector.take_utterance())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_without_stt() {
        let recognizer = MicrophoneRecognizer::new(None, Duration::from_secs(5));
        assert!(!recognizer.is_supported());
    }

    #[tokio::test]
    async fn test_recognize_without_stt_is_capability_error() {
        let recognizer = MicrophoneRecognizer::new(None, Duration::from_secs(5));
        assert!(matches!(
            recognizer.recognize().await,
            Err(Error::Capability(_))
        ));
    }

    /// 100ms buffers at 16kHz
    const BUFFER: usize = 1600;

    #[allow(clippy::cast_precision_loss)]
    fn speech() -> Vec<f32> {
        (0..BUFFER)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn test_listen_ends_on_trailing_silence() {
        let (tx, rx) = std::sync::mpsc::channel();
        for _ in 0..5 {
            tx.send(speech()).unwrap();
        }
        for _ in 0..6 {
            tx.send(vec![0.0; BUFFER]).unwrap();
        }
        // Anything after the utterance ends is not consumed
        tx.send(speech()).unwrap();

        let mut detector = UtteranceDetector::new();
        let stop = AtomicBool::new(false);
        let samples = listen(&rx, &mut detector, &stop, Duration::from_secs(5)).unwrap();

        assert!(samples.len() >= 5 * BUFFER);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_listen_stops_when_flag_set() {
        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(speech()).unwrap();

        let stop = AtomicBool::new(true);
        let err = listen(&rx, &mut UtteranceDetector::new(), &stop, Duration::from_secs(5));
        assert!(matches!(err, Err(Error::Capture(msg)) if msg == "recording aborted"));
    }

    #[test]
    fn test_listen_silence_until_deadline() {
        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(vec![0.0; BUFFER]).unwrap();

        let stop = AtomicBool::new(false);
        let err = listen(&rx, &mut UtteranceDetector::new(), &stop, Duration::from_millis(150));
        assert!(matches!(err, Err(Error::Capture(msg)) if msg == "no speech detected"));
        drop(tx);
    }

    #[test]
    fn test_listen_cuts_long_speech_at_deadline() {
        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(speech()).unwrap();

        let stop = AtomicBool::new(false);
        let samples = listen(&rx, &mut UtteranceDetector::new(), &stop, Duration::from_millis(150))
            .unwrap();
        assert_eq!(samples.len(), BUFFER);
        drop(tx);
    }

    #[test]
    fn test_listen_reports_closed_stream() {
        let (tx, rx) = std::sync::mpsc::channel::<Vec<f32>>();
        drop(tx);

        let stop = AtomicBool::new(false);
        let err = listen(&rx, &mut UtteranceDetector::new(), &stop, Duration::from_secs(5));
        assert!(matches!(err, Err(Error::Capture(msg)) if msg == "microphone stream closed"));
    }

    #[test]
    fn test_dropped_guard_ends_recording() {
        let (tx, rx) = std::sync::mpsc::channel::<Vec<f32>>();
        let stop = Arc::new(AtomicBool::new(false));
        let guard = StopOnDrop(Arc::clone(&stop));

        let recording = std::thread::spawn(move || {
            listen(&rx, &mut UtteranceDetector::new(), &stop, Duration::from_secs(30))
        });
        drop(guard);

        let err = recording.join().unwrap();
        assert!(matches!(err, Err(Error::Capture(msg)) if msg == "recording aborted"));
        drop(tx);
    }
}
