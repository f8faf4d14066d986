//! Voice session state machine
//!
//! A [`Session`] is a pure transition table: every input is an [`Event`], and
//! applying it mutates the session and returns the [`Effect`]s the runtime
//! must carry out, in order. Device and network completions carry the id of
//! the operation that produced them, so completions of operations that were
//! cancelled (stopped, superseded, or torn down by exit) are recognized as
//! stale and dropped.
//!
//! ```text
//!            enter (greet)          reply ready
//!   Idle ───────────────▶ Greeting ────────────▶ Speaking ◀──────────┐
//!    │  ▲                                          │  │              │
//!    │  │ tap (cancel)        playback ended / tap │  │ reply ready  │
//!    │  │                                          ▼  │              │
//!    └──┴───── enter / tap ──────────────────▶ Listening ──▶ Thinking ┘
//!                                                 utterance
//! ```
//!
//! Any failure moves to `Error`; tap acknowledges back to `Idle`; exit resets
//! to `Idle` from everywhere.

use std::fmt;

use crate::Error;
use crate::backend::{AudioClip, VoiceReply};
use crate::emotion::{Emotion, PerformanceSnapshot, select_emotion};

/// Identifier of one device or network operation
pub type OpId = u64;

/// State of a voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// Fetching the opening greeting
    Greeting,
    /// Capturing the student's utterance
    Listening,
    /// Waiting for the tutor's reply
    Thinking,
    /// Playing the tutor's reply
    Speaking,
    /// A turn failed; waiting for acknowledgement or exit
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Greeting => "greeting",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Who said a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

/// One line of the session transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// Category of a failed turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No speech capture support on this device
    Capability,
    /// Recognition failed or was aborted by the environment
    Capture,
    /// Backend request failed or returned an unusable payload
    Network,
    /// Reply audio could not be played
    Playback,
}

/// Failure surfaced to the UI shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Input to the state machine
#[derive(Debug)]
pub enum Event {
    /// The shell entered voice mode
    Enter {
        /// Whether speech capture is available
        supported: bool,
        /// Whether today's greeting is still due
        greet: bool,
    },
    /// The primary control was tapped
    Tap,
    /// The shell left voice mode
    Exit,
    /// A capture attempt finished
    CaptureFinished {
        attempt: OpId,
        result: crate::Result<String>,
    },
    /// A backend request finished
    ReplyFinished {
        request: OpId,
        result: crate::Result<VoiceReply>,
    },
    /// A playback finished on its own (naturally or by failing)
    PlaybackFinished {
        playback: OpId,
        result: crate::Result<()>,
    },
}

/// Side effect the runtime must perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartCapture { attempt: OpId },
    StopCapture,
    Play { playback: OpId, audio: AudioClip },
    StopAudio,
    RequestGreeting { request: OpId, emotion: Emotion },
    RequestReply {
        request: OpId,
        utterance: String,
        emotion: Emotion,
    },
    /// Abandon the outstanding backend request
    CancelRequest,
    /// Persist that today's greeting happened
    RecordGreeting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Greeting,
    Reply,
}

/// Snapshot of a session for the UI shell
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionView {
    pub state: SessionState,
    /// Whether voice mode is entered
    pub active: bool,
    pub transcript: Vec<TranscriptEntry>,
    pub emotion: Emotion,
    pub last_error: Option<SessionError>,
}

/// One voice conversation
#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
    active: bool,
    transcript: Vec<TranscriptEntry>,
    emotion: Emotion,
    performance: Option<PerformanceSnapshot>,
    last_error: Option<SessionError>,
    next_op: OpId,
    capture: Option<OpId>,
    playback: Option<OpId>,
    request: Option<(OpId, RequestKind)>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    #[must_use]
    pub const fn emotion(&self) -> Emotion {
        self.emotion
    }

    #[must_use]
    pub const fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    /// Whether a capture attempt is owned by the session
    #[must_use]
    pub const fn holds_capture(&self) -> bool {
        self.capture.is_some()
    }

    /// Whether a playback is owned by the session
    #[must_use]
    pub const fn holds_playback(&self) -> bool {
        self.playback.is_some()
    }

    /// Whether a backend request is outstanding
    #[must_use]
    pub const fn awaiting_reply(&self) -> bool {
        self.request.is_some()
    }

    /// Replace the performance snapshot used for the next emotion
    pub fn set_performance(&mut self, snapshot: Option<PerformanceSnapshot>) {
        self.performance = snapshot;
    }

    #[must_use]
    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state,
            active: self.active,
            transcript: self.transcript.clone(),
            emotion: self.emotion,
            last_error: self.last_error.clone(),
        }
    }

    /// Apply an event and return the effects to perform, in order
    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        let from = self.state;
        let effects = match event {
            Event::Enter { supported, greet } => self.on_enter(supported, greet),
            Event::Tap => self.on_tap(),
            Event::Exit => self.on_exit(),
            Event::CaptureFinished { attempt, result } => self.on_capture(attempt, result),
            Event::ReplyFinished { request, result } => self.on_reply(request, result),
            Event::PlaybackFinished { playback, result } => self.on_playback(playback, result),
        };

        if from != self.state {
            tracing::info!(from = %from, to = %self.state, "voice session transition");
        }

        debug_assert!(self.capture.is_none() || self.state == SessionState::Listening);
        debug_assert!(self.playback.is_none() || self.state == SessionState::Speaking);
        effects
    }

    fn on_enter(&mut self, supported: bool, greet: bool) -> Vec<Effect> {
        if self.active {
            tracing::debug!(state = %self.state, "already in voice mode");
            return Vec::new();
        }

        self.active = true;
        self.transcript.clear();
        self.last_error = None;

        if !supported {
            return self.fail(
                ErrorKind::Capability,
                "speech recognition is not supported on this device".to_string(),
            );
        }

        if greet {
            self.emotion = select_emotion(self.performance.as_ref());
            let request = self.next_id();
            self.request = Some((request, RequestKind::Greeting));
            self.state = SessionState::Greeting;
            return vec![Effect::RequestGreeting {
                request,
                emotion: self.emotion,
            }];
        }

        self.listen()
    }

    fn on_tap(&mut self) -> Vec<Effect> {
        if !self.active {
            return Vec::new();
        }

        match self.state {
            SessionState::Idle => self.listen(),
            SessionState::Listening => {
                // Deliberate cancel, not a finished utterance
                self.capture = None;
                self.state = SessionState::Idle;
                vec![Effect::StopCapture]
            }
            // Interrupt the tutor to talk
            SessionState::Speaking => self.listen(),
            SessionState::Error => {
                self.last_error = None;
                self.state = SessionState::Idle;
                self.release()
            }
            SessionState::Greeting | SessionState::Thinking => {
                tracing::debug!(state = %self.state, "tap ignored while awaiting reply");
                Vec::new()
            }
        }
    }

    fn on_exit(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::StopCapture, Effect::StopAudio];
        if self.request.take().is_some() {
            effects.push(Effect::CancelRequest);
        }
        self.capture = None;
        self.playback = None;
        self.active = false;
        self.state = SessionState::Idle;
        effects
    }

    fn on_capture(&mut self, attempt: OpId, result: crate::Result<String>) -> Vec<Effect> {
        if self.capture != Some(attempt) {
            tracing::debug!(attempt, "ignoring stale capture result");
            return Vec::new();
        }
        self.capture = None;

        match result {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return self.fail(ErrorKind::Capture, "no speech detected".to_string());
                }

                self.transcript.push(TranscriptEntry {
                    speaker: Speaker::User,
                    text: text.to_string(),
                });
                self.emotion = select_emotion(self.performance.as_ref());
                let request = self.next_id();
                self.request = Some((request, RequestKind::Reply));
                self.state = SessionState::Thinking;
                vec![Effect::RequestReply {
                    request,
                    utterance: text.to_string(),
                    emotion: self.emotion,
                }]
            }
            Err(Error::Capability(message)) => self.fail(ErrorKind::Capability, message),
            Err(e) => self.fail(ErrorKind::Capture, e.to_string()),
        }
    }

    fn on_reply(&mut self, request: OpId, result: crate::Result<VoiceReply>) -> Vec<Effect> {
        let kind = match self.request {
            Some((id, kind)) if id == request => kind,
            _ => {
                tracing::debug!(request, "ignoring stale reply");
                return Vec::new();
            }
        };
        self.request = None;

        match result {
            Ok(reply) => {
                let mut effects = Vec::new();
                if kind == RequestKind::Greeting {
                    effects.push(Effect::RecordGreeting);
                }
                effects.extend(self.speak(reply));
                effects
            }
            Err(e) => self.fail(ErrorKind::Network, e.to_string()),
        }
    }

    fn on_playback(&mut self, playback: OpId, result: crate::Result<()>) -> Vec<Effect> {
        if self.playback != Some(playback) {
            tracing::debug!(playback, "ignoring stale playback end");
            return Vec::new();
        }
        self.playback = None;

        match result {
            // Continuous loop: hand the floor back to the student
            Ok(()) => self.listen(),
            Err(e) => self.fail(ErrorKind::Playback, e.to_string()),
        }
    }

    /// Enter `Listening`, releasing playback first
    fn listen(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.playback.take().is_some() {
            effects.push(Effect::StopAudio);
        }
        let attempt = self.next_id();
        self.capture = Some(attempt);
        self.state = SessionState::Listening;
        effects.push(Effect::StartCapture { attempt });
        effects
    }

    /// Enter `Speaking`; the reply joins the transcript before audio starts
    fn speak(&mut self, reply: VoiceReply) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.capture.take().is_some() {
            effects.push(Effect::StopCapture);
        }
        // Every reply gets an entry, even one whose text header was missing
        self.transcript.push(TranscriptEntry {
            speaker: Speaker::Assistant,
            text: reply.text,
        });
        self.emotion = reply.emotion;
        let playback = self.next_id();
        self.playback = Some(playback);
        self.state = SessionState::Speaking;
        effects.push(Effect::Play {
            playback,
            audio: reply.audio,
        });
        effects
    }

    fn fail(&mut self, kind: ErrorKind, message: String) -> Vec<Effect> {
        tracing::error!(?kind, error = %message, "voice turn failed");
        self.last_error = Some(SessionError { kind, message });
        self.state = SessionState::Error;
        self.release()
    }

    /// Release whatever the session still holds
    fn release(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.capture.take().is_some() {
            effects.push(Effect::StopCapture);
        }
        if self.playback.take().is_some() {
            effects.push(Effect::StopAudio);
        }
        if self.request.take().is_some() {
            effects.push(Effect::CancelRequest);
        }
        effects
    }

    fn next_id(&mut self) -> OpId {
        self.next_op += 1;
        self.next_op
    }
}
