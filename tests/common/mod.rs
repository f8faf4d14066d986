//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use study_voice::backend::{GreetingRequest, ReplyRequest};
use study_voice::greeting::{Clock, FixedGreeting, GreetingGate, GreetingLedger, MemoryLedger};
use study_voice::voice::{AudioSink, SpeechEngine};
use study_voice::{
    AudioClip, Error, Result, SessionView, TutorBackend, VoiceController, VoiceReply,
};

/// How long a test waits for the session to settle
pub const SETTLE: Duration = Duration::from_secs(5);

/// User id the test gate is keyed by
pub const TEST_USER: &str = "student-1";

/// Adds one to a counter if dropped before [`finish`](Self::finish)
struct Unfinished<'a> {
    counter: &'a AtomicUsize,
    finished: bool,
}

impl<'a> Unfinished<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        Self {
            counter,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for Unfinished<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Speech engine that replays scripted results, then hangs
pub struct ScriptedEngine {
    supported: bool,
    script: Mutex<VecDeque<Result<String>>>,
    pub calls: AtomicUsize,
    /// Attempts whose future was dropped mid-recognition
    pub abandoned: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            supported: true,
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            abandoned: AtomicUsize::new(0),
        })
    }

    pub fn unsupported() -> Arc<Self> {
        Arc::new(Self {
            supported: false,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            abandoned: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, result: Result<String>) {
        self.script.lock().unwrap().push_back(result);
    }
}

#[async_trait]
impl SpeechEngine for ScriptedEngine {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn recognize(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let attempt = Unfinished::new(&self.abandoned);
        let next = self.script.lock().unwrap().pop_front();
        let result = match next {
            Some(result) => result,
            None => std::future::pending().await,
        };
        attempt.finish();
        result
    }
}

/// How a [`FakeSink`] plays clips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// Finish right away
    Instant,
    /// Play until stopped
    Hold,
    /// Fail to play
    Fail,
}

/// Audio sink with scripted behavior
pub struct FakeSink {
    mode: Mutex<SinkMode>,
    pub plays: AtomicUsize,
    /// Clips whose future was dropped mid-playback
    pub halted: AtomicUsize,
}

impl FakeSink {
    pub fn new(mode: SinkMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            plays: AtomicUsize::new(0),
            halted: AtomicUsize::new(0),
        })
    }

    pub fn set_mode(&self, mode: SinkMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn play(&self, _audio: &AudioClip) -> Result<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        let clip = Unfinished::new(&self.halted);
        let mode = *self.mode.lock().unwrap();
        let result = match mode {
            SinkMode::Instant => {
                tokio::task::yield_now().await;
                Ok(())
            }
            SinkMode::Hold => std::future::pending().await,
            SinkMode::Fail => Err(Error::Playback("decoder rejected clip".to_string())),
        };
        clip.finish();
        result
    }
}

/// Scripted outcome of a backend call
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    Fail(String),
    Hang,
}

/// Tutor backend with scripted replies that records every request
pub struct FakeBackend {
    greeting: Mutex<Step>,
    replies: Mutex<VecDeque<Step>>,
    pub greeting_requests: Mutex<Vec<GreetingRequest>>,
    pub reply_requests: Mutex<Vec<ReplyRequest>>,
}

impl FakeBackend {
    /// Greetings echo their text; replies follow `replies`, then hang
    pub fn new(replies: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            greeting: Mutex::new(Step::Reply(String::new())),
            replies: Mutex::new(replies.into()),
            greeting_requests: Mutex::new(Vec::new()),
            reply_requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set_greeting(&self, step: Step) {
        *self.greeting.lock().unwrap() = step;
    }

    pub fn greeting_count(&self) -> usize {
        self.greeting_requests.lock().unwrap().len()
    }

    pub fn reply_count(&self) -> usize {
        self.reply_requests.lock().unwrap().len()
    }

    async fn run(step: Step, fallback_text: &str, request_emotion: study_voice::Emotion) -> Result<VoiceReply> {
        match step {
            Step::Reply(text) => {
                let text = if text.is_empty() {
                    fallback_text.to_string()
                } else {
                    text
                };
                Ok(VoiceReply {
                    text,
                    audio: AudioClip::mp3(vec![0xff, 0xfb, 0x90, 0x00]),
                    emotion: request_emotion,
                })
            }
            Step::Fail(message) => Err(Error::Network(message)),
            Step::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl TutorBackend for FakeBackend {
    async fn voice_reply(&self, request: &ReplyRequest) -> Result<VoiceReply> {
        self.reply_requests.lock().unwrap().push(request.clone());
        let step = self.replies.lock().unwrap().pop_front().unwrap_or(Step::Hang);
        Self::run(step, "", request.emotion).await
    }

    async fn greeting(&self, request: &GreetingRequest) -> Result<VoiceReply> {
        self.greeting_requests.lock().unwrap().push(request.clone());
        let step = self.greeting.lock().unwrap().clone();
        Self::run(step, &request.text, request.emotion).await
    }
}

/// Clock that tests can move between days
pub struct ManualClock(Mutex<NaiveDate>);

impl ManualClock {
    pub fn new(date: NaiveDate) -> Arc<Self> {
        Arc::new(Self(Mutex::new(date)))
    }

    pub fn set(&self, date: NaiveDate) {
        *self.0.lock().unwrap() = date;
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        *self.0.lock().unwrap()
    }
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

/// Everything a controller test needs to poke at
pub struct Harness {
    pub controller: VoiceController,
    pub engine: Arc<ScriptedEngine>,
    pub sink: Arc<FakeSink>,
    pub backend: Arc<FakeBackend>,
    pub ledger: MemoryLedger,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Controller over fakes; `greeted_today` pre-marks the ledger
    pub fn new(
        engine: Arc<ScriptedEngine>,
        sink: Arc<FakeSink>,
        backend: Arc<FakeBackend>,
        greeted_today: bool,
    ) -> Self {
        Self::with_reply_timeout(engine, sink, backend, greeted_today, Duration::from_secs(30))
    }

    pub fn with_reply_timeout(
        engine: Arc<ScriptedEngine>,
        sink: Arc<FakeSink>,
        backend: Arc<FakeBackend>,
        greeted_today: bool,
        reply_timeout: Duration,
    ) -> Self {
        let ledger = MemoryLedger::new();
        let clock = ManualClock::new(day(10));
        if greeted_today {
            ledger.record_greeting(TEST_USER, day(10)).unwrap();
        }

        let gate = GreetingGate::new(Arc::new(ledger.clone()), clock.clone(), TEST_USER);
        let controller = VoiceController::builder(engine.clone(), sink.clone(), backend.clone())
            .greeting_gate(gate)
            .greeting_picker(Arc::new(FixedGreeting(0)))
            .reply_timeout(reply_timeout)
            .spawn();

        Self {
            controller,
            engine,
            sink,
            backend,
            ledger,
            clock,
        }
    }

    /// Wait for the session to satisfy `predicate`, panicking after [`SETTLE`]
    pub async fn settle(&self, predicate: impl FnMut(&SessionView) -> bool) -> SessionView {
        tokio::time::timeout(SETTLE, self.controller.wait_for(predicate))
            .await
            .expect("session did not settle")
            .expect("session task ended")
    }

    /// Wait until `counter` reaches `expected`, panicking after [`SETTLE`]
    pub async fn wait_count(counter: &AtomicUsize, expected: usize) {
        tokio::time::timeout(SETTLE, async {
            while counter.load(Ordering::SeqCst) < expected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("counter never reached expected value");
    }

    /// Assert the session holds no device handles
    pub fn assert_released(&self) {
        assert!(!self.controller.is_listening(), "capture still active");
        assert!(!self.controller.is_playing(), "playback still active");
    }
}
