//! Study Voice - hands-free voice tutoring sessions
//!
//! This library provides the voice-mode controller of the study assistant:
//! - A session state machine (greeting, listening, thinking, speaking)
//! - Single-flight speech capture and audio playback
//! - Emotion selection from quiz performance
//! - A once-per-day greeting gate backed by SQLite
//! - An HTTP client for the tutor backend
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Shell (terminal)                   │
//! │   enter  │  tap  │  exit  │  watch SessionView      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               VoiceController task                  │
//! │   Session  │  GreetingGate  │  Emotion selection    │
//! └──────┬─────────────┬───────────────────┬────────────┘
//!        │             │                   │
//! ┌──────▼──────┐ ┌────▼──────────┐ ┌──────▼────────────┐
//! │SpeechCapture│ │ AudioPlayback │ │   TutorBackend    │
//! │ mic+Whisper │ │  cpal+mp3     │ │ voice-chat / TTS  │
//! └─────────────┘ └───────────────┘ └───────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod controller;
pub mod db;
pub mod emotion;
pub mod error;
pub mod greeting;
pub mod session;
pub mod shell;
pub mod voice;

pub use backend::{AudioClip, CourseContext, HttpBackend, TutorBackend, VoiceReply};
pub use config::Config;
pub use controller::{VoiceController, VoiceControllerBuilder};
pub use db::DbPool;
pub use emotion::{Emotion, PerformanceSnapshot, Trend, select_emotion};
pub use error::{Error, Result};
pub use session::{ErrorKind, SessionError, SessionState, SessionView, Speaker, TranscriptEntry};
