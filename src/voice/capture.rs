//! Single-flight speech capture
//!
//! [`SpeechCapture`] owns at most one recognition attempt at a time and
//! reports its outcome through a one-shot callback. Stopping an attempt
//! drops the engine's future, and the callback is never invoked for it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::AbortHandle;

use crate::{Error, Result};

/// A speech recognizer producing one utterance per call
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Whether recognition is possible at all on this device
    fn is_supported(&self) -> bool;

    /// Recognize one utterance
    ///
    /// Dropping the returned future must abandon the attempt.
    ///
    /// # Errors
    ///
    /// Returns error if recognition fails
    async fn recognize(&self) -> Result<String>;
}

struct Attempt {
    id: u64,
    task: AbortHandle,
}

/// Speech capture wrapper enforcing one outstanding attempt
pub struct SpeechCapture {
    engine: Arc<dyn SpeechEngine>,
    timeout: Duration,
    active: Arc<Mutex<Option<Attempt>>>,
    next_id: AtomicU64,
}

impl SpeechCapture {
    /// Wrap an engine; each attempt is bounded by `timeout`
    #[must_use]
    pub fn new(engine: Arc<dyn SpeechEngine>, timeout: Duration) -> Self {
        Self {
            engine,
            timeout,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.engine.is_supported()
    }

    /// Whether an attempt is in flight
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.lock().is_some()
    }

    /// Begin one capture attempt
    ///
    /// `on_done` fires exactly once with the recognized text or the failure,
    /// unless [`stop_listening`](Self::stop_listening) cancels the attempt
    /// first. If capture is unsupported or an attempt is already running,
    /// `on_done` fires immediately with an error. Must be called from within
    /// a Tokio runtime.
    pub fn start_listening<F>(&self, on_done: F)
    where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        if !self.engine.is_supported() {
            on_done(Err(Error::Capability(
                "speech recognition is not supported on this device".to_string(),
            )));
            return;
        }

        let mut active = self.lock();
        if active.is_some() {
            drop(active);
            tracing::warn!("capture already in progress");
            on_done(Err(Error::Capture("already listening".to_string())));
            return;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let engine = Arc::clone(&self.engine);
        let slot = Arc::clone(&self.active);
        let timeout = self.timeout;

        // The slot stays locked until the attempt is registered, so the task
        // cannot finish before it can be found.
        let task = tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, engine.recognize()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "no speech recognized within {}s",
                    timeout.as_secs()
                ))),
            };

            {
                let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.as_ref().is_none_or(|a| a.id != id) {
                    return;
                }
                *slot = None;
            }

            match &result {
                Ok(text) => tracing::debug!(attempt = id, chars = text.len(), "capture recognized"),
                Err(e) => tracing::debug!(attempt = id, error = %e, "capture failed"),
            }
            on_done(result);
        });

        *active = Some(Attempt {
            id,
            task: task.abort_handle(),
        });
        tracing::debug!(attempt = id, "capture started");
    }

    /// Cancel the active attempt, if any, without reporting it
    pub fn stop_listening(&self) {
        if let Some(attempt) = self.lock().take() {
            attempt.task.abort();
            tracing::debug!(attempt = attempt.id, "capture stopped");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Attempt>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SpeechCapture {
    fn drop(&mut self) {
        self.stop_listening();
    }
}
