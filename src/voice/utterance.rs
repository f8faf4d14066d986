//! End-of-utterance detection
//!
//! Energy-based: an utterance starts at the first loud chunk and completes
//! once enough speech has been followed by enough silence.

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to count as an utterance
const MIN_SPEECH_MS: usize = 300;

/// Silence duration that ends an utterance
const SILENCE_MS: usize = 500;

/// Rate [`UtteranceDetector::new`] assumes
const DEFAULT_RATE: u32 = 16000;

/// Progress of the current utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// No speech heard yet
    Waiting,
    /// Speech heard, accumulating
    InSpeech,
    /// Speech followed by trailing silence
    Complete,
}

/// Segments one utterance out of a stream of sample chunks
#[derive(Debug)]
pub struct UtteranceDetector {
    state: DetectorState,
    buffer: Vec<f32>,
    silence_counter: usize,
    min_speech_samples: usize,
    silence_samples: usize,
}

impl Default for UtteranceDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl UtteranceDetector {
    /// Detector for 16 kHz input
    #[must_use]
    pub const fn new() -> Self {
        Self::for_sample_rate(DEFAULT_RATE)
    }

    /// Detector whose timing thresholds are scaled to `sample_rate`
    #[must_use]
    pub const fn for_sample_rate(sample_rate: u32) -> Self {
        let per_ms = sample_rate as usize / 1000;
        Self {
            state: DetectorState::Waiting,
            buffer: Vec::new(),
            silence_counter: 0,
            min_speech_samples: MIN_SPEECH_MS * per_ms,
            silence_samples: SILENCE_MS * per_ms,
        }
    }

    /// Feed a chunk of samples
    ///
    /// Returns true once the utterance is complete.
    pub fn process(&mut self, samples: &[f32]) -> bool {
        if samples.is_empty() {
            return self.is_complete();
        }

        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            DetectorState::Waiting => {
                if is_speech {
                    self.state = DetectorState::InSpeech;
                    self.buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech started");
                }
            }
            DetectorState::InSpeech => {
                self.buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > self.silence_samples {
                    if self.buffer.len() - self.silence_counter > self.min_speech_samples {
                        tracing::debug!(samples = self.buffer.len(), "utterance complete");
                        self.state = DetectorState::Complete;
                    } else {
                        // A click or cough, not speech
                        tracing::trace!("speech too short, waiting again");
                        self.reset();
                    }
                }
            }
            DetectorState::Complete => {}
        }

        self.is_complete()
    }

    /// Whether any speech has been heard
    #[must_use]
    pub fn has_speech(&self) -> bool {
        self.state != DetectorState::Waiting
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == DetectorState::Complete
    }

    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    /// Take the recorded utterance, resetting the detector
    pub fn take_utterance(&mut self) -> Vec<f32> {
        let samples = std::mem::take(&mut self.buffer);
        self.reset();
        samples
    }

    pub fn reset(&mut self) {
        self.state = DetectorState::Waiting;
        self.buffer.clear();
        self.silence_counter = 0;
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 100ms chunks at 16kHz
    const CHUNK: usize = 1600;

    fn tone(chunks: usize) -> Vec<Vec<f32>> {
        tone_sized(chunks, CHUNK)
    }

    fn tone_sized(chunks: usize, size: usize) -> Vec<Vec<f32>> {
        (0..chunks)
            .map(|c| {
                (0..size)
                    .map(|i| {
                        #[allow(clippy::cast_precision_loss)]
                        let t = (c * size + i) as f32 / 16000.0;
                        0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
                    })
                    .collect()
            })
            .collect()
    }

    fn silence(chunks: usize) -> Vec<Vec<f32>> {
        vec![vec![0.0; CHUNK]; chunks]
    }

    #[test]
    fn test_energy_calculation() {
        assert!(calculate_energy(&[0.0; 100]) < 0.001);
        assert!(calculate_energy(&[0.5; 100]) > 0.4);
        assert!(calculate_energy(&[]) < f32::EPSILON);
    }

    #[test]
    fn test_silence_never_completes() {
        let mut detector = UtteranceDetector::new();
        for chunk in silence(20) {
            assert!(!detector.process(&chunk));
        }
        assert!(!detector.has_speech());
    }

    #[test]
    fn test_speech_then_silence_completes() {
        let mut detector = UtteranceDetector::new();
        for chunk in tone(5) {
            assert!(!detector.process(&chunk));
        }
        assert_eq!(detector.state(), DetectorState::InSpeech);

        let completed = silence(6).iter().any(|chunk| detector.process(chunk));
        assert!(completed);

        let utterance = detector.take_utterance();
        assert!(utterance.len() >= 5 * CHUNK);
        assert_eq!(detector.state(), DetectorState::Waiting);
    }

    #[test]
    fn test_short_blip_is_discarded() {
        let mut detector = UtteranceDetector::new();
        detector.process(&tone(1)[0]);
        for chunk in silence(6) {
            assert!(!detector.process(&chunk));
        }
        assert_eq!(detector.state(), DetectorState::Waiting);
    }

    #[test]
    fn test_thresholds_follow_sample_rate() {
        // 100ms chunks at 48kHz
        let chunk = 4800;
        let mut detector = UtteranceDetector::for_sample_rate(48_000);
        for c in tone_sized(5, chunk) {
            assert!(!detector.process(&c));
        }

        // 19200 silent samples end a 16kHz utterance, but are only 0.4s here
        for _ in 0..4 {
            assert!(!detector.process(&vec![0.0; chunk]));
        }
        assert_eq!(detector.state(), DetectorState::InSpeech);

        assert!(detector.process(&vec![0.0; 2 * chunk]));
    }
}
