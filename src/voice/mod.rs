//! Voice devices
//!
//! [`SpeechCapture`] and [`AudioPlayback`] are the single-flight wrappers a
//! session drives. They sit on top of the [`SpeechEngine`] and [`AudioSink`]
//! seams; the native implementations record with cpal, transcribe with
//! Whisper and play MP3 replies on the default output device.

mod capture;
mod microphone;
mod playback;
mod recognizer;
mod speaker;
mod stt;
mod utterance;

pub use capture::{SpeechCapture, SpeechEngine};
pub use microphone::{MicInput, SAMPLE_RATE, input_available, samples_to_wav};
pub use playback::{AudioPlayback, AudioSink};
pub use recognizer::MicrophoneRecognizer;
pub use speaker::{Pcm, SpeakerSink, decode_mp3, resample};
pub use stt::SpeechToText;
pub use utterance::{DetectorState, UtteranceDetector};
