//! Voice session runtime
//!
//! [`VoiceController`] runs a [`Session`] on its own task. User intents and
//! device/network completions are funnelled through one channel, so the
//! session sees a single ordered stream of events; the effects it returns
//! are carried out against the capture and playback wrappers and the tutor
//! backend. The UI shell observes the session through a [`watch`] channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::backend::{CourseContext, GreetingRequest, ReplyRequest, TutorBackend};
use crate::emotion::{Emotion, PerformanceSnapshot};
use crate::greeting::{
    GreetingGate, GreetingPicker, LocalClock, MemoryLedger, RandomGreeting,
};
use crate::session::{Effect, Event, OpId, Session, SessionView};
use crate::voice::{AudioPlayback, AudioSink, SpeechCapture, SpeechEngine};
use crate::Error;

/// Default bound on capture attempts and backend requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// User identity of the default in-memory greeting gate
const DEFAULT_USER: &str = "local";

enum Intent {
    Enter(CourseContext),
    Tap,
    Exit,
    Performance(Option<PerformanceSnapshot>),
}

enum Input {
    Intent(Intent, oneshot::Sender<()>),
    Completion(Event),
}

/// Builder for a [`VoiceController`]
pub struct VoiceControllerBuilder {
    engine: Arc<dyn SpeechEngine>,
    sink: Arc<dyn AudioSink>,
    backend: Arc<dyn TutorBackend>,
    gate: Option<GreetingGate>,
    picker: Arc<dyn GreetingPicker>,
    performance: Option<PerformanceSnapshot>,
    capture_timeout: Duration,
    reply_timeout: Duration,
}

impl VoiceControllerBuilder {
    /// Gate deciding whether today's greeting is due
    #[must_use]
    pub fn greeting_gate(mut self, gate: GreetingGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Strategy choosing the greeting text
    #[must_use]
    pub fn greeting_picker(mut self, picker: Arc<dyn GreetingPicker>) -> Self {
        self.picker = picker;
        self
    }

    /// Initial performance snapshot
    #[must_use]
    pub fn performance(mut self, snapshot: Option<PerformanceSnapshot>) -> Self {
        self.performance = snapshot;
        self
    }

    #[must_use]
    pub const fn capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Start the session task
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(self) -> VoiceController {
        let capture = Arc::new(SpeechCapture::new(self.engine, self.capture_timeout));
        let playback = Arc::new(AudioPlayback::new(self.sink));
        let gate = self.gate.unwrap_or_else(|| {
            GreetingGate::new(
                Arc::new(MemoryLedger::new()),
                Arc::new(LocalClock),
                DEFAULT_USER,
            )
        });

        let mut session = Session::new();
        session.set_performance(self.performance);

        let (tx, rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(session.view());

        let runtime = Runtime {
            session,
            capture: Arc::clone(&capture),
            playback: Arc::clone(&playback),
            backend: self.backend,
            gate,
            picker: self.picker,
            reply_timeout: self.reply_timeout,
            course: None,
            inflight: None,
            inputs: tx.downgrade(),
            view: view_tx,
        };
        let task = tokio::spawn(runtime.run(rx));

        VoiceController {
            inputs: tx,
            view: view_rx,
            capture,
            playback,
            task,
        }
    }
}

/// Handle to a running voice session
pub struct VoiceController {
    inputs: mpsc::UnboundedSender<Input>,
    view: watch::Receiver<SessionView>,
    capture: Arc<SpeechCapture>,
    playback: Arc<AudioPlayback>,
    task: JoinHandle<()>,
}

impl VoiceController {
    /// Start building a controller over the given devices and backend
    #[must_use]
    pub fn builder(
        engine: Arc<dyn SpeechEngine>,
        sink: Arc<dyn AudioSink>,
        backend: Arc<dyn TutorBackend>,
    ) -> VoiceControllerBuilder {
        VoiceControllerBuilder {
            engine,
            sink,
            backend,
            gate: None,
            picker: Arc::new(RandomGreeting),
            performance: None,
            capture_timeout: DEFAULT_TIMEOUT,
            reply_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Enter voice mode for a course
    ///
    /// Returns once the session has reacted; the greeting and later turns
    /// proceed in the background.
    pub async fn enter_voice_mode(&self, course: CourseContext) {
        self.send(Intent::Enter(course)).await;
    }

    /// The primary voice control was tapped
    pub async fn primary_control_tapped(&self) {
        self.send(Intent::Tap).await;
    }

    /// Leave voice mode
    ///
    /// Capture and playback are halted before this returns.
    pub async fn exit_voice_mode(&self) {
        self.capture.stop_listening();
        self.playback.stop_audio();
        self.send(Intent::Exit).await;
    }

    /// Replace the snapshot used to pick the next emotion
    pub async fn update_performance(&self, snapshot: Option<PerformanceSnapshot>) {
        self.send(Intent::Performance(snapshot)).await;
    }

    /// Current session snapshot
    #[must_use]
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every session change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Wait until the session satisfies `predicate`
    ///
    /// Returns `None` if the session task has ended.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SessionView) -> bool,
    ) -> Option<SessionView> {
        let mut rx = self.subscribe();
        let view = rx.wait_for(|view| predicate(view)).await.ok()?.clone();
        Some(view)
    }

    /// Whether a capture attempt is running
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.capture.is_listening()
    }

    /// Whether a clip is playing
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    async fn send(&self, intent: Intent) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.inputs.send(Input::Intent(intent, ack_tx)).is_err() {
            tracing::warn!("voice session task has stopped");
            return;
        }
        let _ = ack_rx.await;
    }
}

impl Drop for VoiceController {
    fn drop(&mut self) {
        self.task.abort();
        self.capture.stop_listening();
        self.playback.stop_audio();
    }
}

struct Runtime {
    session: Session,
    capture: Arc<SpeechCapture>,
    playback: Arc<AudioPlayback>,
    backend: Arc<dyn TutorBackend>,
    gate: GreetingGate,
    picker: Arc<dyn GreetingPicker>,
    reply_timeout: Duration,
    course: Option<CourseContext>,
    inflight: Option<JoinHandle<()>>,
    inputs: mpsc::WeakUnboundedSender<Input>,
    view: watch::Sender<SessionView>,
}

impl Runtime {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        tracing::debug!("voice session task started");

        while let Some(input) = rx.recv().await {
            match input {
                Input::Intent(intent, ack) => {
                    self.handle_intent(intent);
                    self.publish();
                    let _ = ack.send(());
                }
                Input::Completion(event) => {
                    self.dispatch(event);
                    self.publish();
                }
            }
        }

        tracing::debug!("voice session task stopped");
    }

    fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Enter(course) => {
                let supported = self.capture.is_supported();
                let greet = supported && !self.session.is_active() && self.gate.should_greet();
                tracing::info!(
                    course = %course.course_id,
                    supported,
                    greet,
                    "entering voice mode"
                );
                if !self.session.is_active() {
                    self.course = Some(course);
                }
                self.dispatch(Event::Enter { supported, greet });
            }
            Intent::Tap => self.dispatch(Event::Tap),
            Intent::Exit => {
                tracing::info!("exiting voice mode");
                self.dispatch(Event::Exit);
            }
            Intent::Performance(snapshot) => self.session.set_performance(snapshot),
        }
    }

    fn dispatch(&mut self, event: Event) {
        for effect in self.session.apply(event) {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::StartCapture { attempt } => {
                let inputs = self.inputs.clone();
                self.capture.start_listening(move |result| {
                    complete(&inputs, Event::CaptureFinished { attempt, result });
                });
            }
            Effect::StopCapture => self.capture.stop_listening(),
            Effect::Play { playback, audio } => {
                let inputs = self.inputs.clone();
                self.playback.play_audio(audio, move |result| {
                    complete(&inputs, Event::PlaybackFinished { playback, result });
                });
            }
            Effect::StopAudio => self.playback.stop_audio(),
            Effect::RequestGreeting { request, emotion } => {
                self.request_greeting(request, emotion);
            }
            Effect::RequestReply {
                request,
                utterance,
                emotion,
            } => self.request_reply(request, utterance, emotion),
            Effect::CancelRequest => self.cancel_request(),
            Effect::RecordGreeting => self.gate.mark_greeted(),
        }
    }

    fn request_greeting(&mut self, request: OpId, emotion: Emotion) {
        let course = self.course.clone().unwrap_or_default();
        let req = GreetingRequest {
            text: self.picker.pick(&course),
            course,
            emotion,
        };
        let backend = Arc::clone(&self.backend);
        let timeout = self.reply_timeout;

        self.spawn_request(request, async move {
            bounded(timeout, backend.greeting(&req)).await
        });
    }

    fn request_reply(&mut self, request: OpId, utterance: String, emotion: Emotion) {
        let req = ReplyRequest {
            utterance,
            course: self.course.clone().unwrap_or_default(),
            emotion,
        };
        let backend = Arc::clone(&self.backend);
        let timeout = self.reply_timeout;

        self.spawn_request(request, async move {
            bounded(timeout, backend.voice_reply(&req)).await
        });
    }

    fn spawn_request<F>(&mut self, request: OpId, fut: F)
    where
        F: Future<Output = crate::Result<crate::backend::VoiceReply>> + Send + 'static,
    {
        self.cancel_request();
        let inputs = self.inputs.clone();
        self.inflight = Some(tokio::spawn(async move {
            let result = fut.await;
            complete(&inputs, Event::ReplyFinished { request, result });
        }));
    }

    fn cancel_request(&mut self) {
        if let Some(task) = self.inflight.take() {
            task.abort();
        }
    }

    fn publish(&self) {
        let next = self.session.view();
        self.view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.cancel_request();
    }
}

/// Feed a completion back to the session task, if it is still running
fn complete(inputs: &mpsc::WeakUnboundedSender<Input>, event: Event) {
    if let Some(tx) = inputs.upgrade() {
        let _ = tx.send(Input::Completion(event));
    }
}

async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = crate::Result<T>>,
) -> crate::Result<T> {
    tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
        Err(Error::Timeout(format!(
            "no reply within {}s",
            timeout.as_secs()
        )))
    })
}
