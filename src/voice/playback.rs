//! Single-flight audio playback
//!
//! [`AudioPlayback`] plays one clip at a time. Starting a clip stops the
//! previous one first; a stopped clip never reports completion.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::task::AbortHandle;

use crate::Result;
use crate::backend::AudioClip;

/// An output device that can play encoded audio
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `audio`, returning when it has finished
    ///
    /// Dropping the returned future must halt playback.
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be decoded or played
    async fn play(&self, audio: &AudioClip) -> Result<()>;
}

struct Playing {
    id: u64,
    task: AbortHandle,
}

/// Playback wrapper enforcing one playing clip
pub struct AudioPlayback {
    sink: Arc<dyn AudioSink>,
    active: Arc<Mutex<Option<Playing>>>,
    next_id: AtomicU64,
}

impl AudioPlayback {
    #[must_use]
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            sink,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether a clip is playing
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.lock().is_some()
    }

    /// Stop whatever is playing, then play `audio`
    ///
    /// `on_end` fires exactly once when the clip ends on its own: `Ok` on
    /// natural completion, `Err` if playback failed. It is not called if
    /// [`stop_audio`](Self::stop_audio) or a later `play_audio` pre-empts the
    /// clip. Must be called from within a Tokio runtime.
    pub fn play_audio<F>(&self, audio: AudioClip, on_end: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let mut active = self.lock();
        if let Some(previous) = active.take() {
            previous.task.abort();
            tracing::debug!(playback = previous.id, "pre-empted previous playback");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sink = Arc::clone(&self.sink);
        let slot = Arc::clone(&self.active);
        let bytes = audio.len();

        let task = tokio::spawn(async move {
            let result = sink.play(&audio).await;

            {
                let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.as_ref().is_none_or(|p| p.id != id) {
                    return;
                }
                *slot = None;
            }

            match &result {
                Ok(()) => tracing::debug!(playback = id, "playback complete"),
                Err(e) => tracing::error!(playback = id, error = %e, "playback failed"),
            }
            on_end(result);
        });

        *active = Some(Playing {
            id,
            task: task.abort_handle(),
        });
        tracing::debug!(playback = id, bytes, "playback started");
    }

    /// Halt playback and release the clip
    pub fn stop_audio(&self) {
        if let Some(playing) = self.lock().take() {
            playing.task.abort();
            tracing::debug!(playback = playing.id, "playback stopped");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Playing>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop_audio();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Sink that "plays" for a clip-length-dependent time
    struct TimedSink;

    #[async_trait]
    impl AudioSink for TimedSink {
        async fn play(&self, audio: &AudioClip) -> Result<()> {
            if audio.is_empty() {
                return Err(Error::Playback("empty clip".to_string()));
            }
            tokio::time::sleep(Duration::from_millis(audio.len() as u64 * 10)).await;
            Ok(())
        }
    }

    /// Sink that plays until its future is dropped
    #[derive(Default)]
    struct EndlessSink {
        halted: AtomicUsize,
    }

    struct CountOnDrop<'a>(&'a AtomicUsize);

    impl Drop for CountOnDrop<'_> {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AudioSink for EndlessSink {
        async fn play(&self, _audio: &AudioClip) -> Result<()> {
            let _halt = CountOnDrop(&self.halted);
            std::future::pending().await
        }
    }

    fn clip(len: usize) -> AudioClip {
        AudioClip::mp3(vec![0u8; len])
    }

    fn channel(
        tag: &'static str,
        tx: &mpsc::UnboundedSender<(&'static str, Result<()>)>,
    ) -> impl FnOnce(Result<()>) + Send + 'static {
        let tx = tx.clone();
        move |r| {
            let _ = tx.send((tag, r));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_natural_end_fires_once() {
        let playback = AudioPlayback::new(Arc::new(TimedSink));
        let (tx, mut rx) = mpsc::unbounded_channel();

        playback.play_audio(clip(5), channel("a", &tx));
        assert!(playback.is_playing());
        drop(tx);

        let (tag, result) = rx.recv().await.unwrap();
        assert_eq!(tag, "a");
        assert!(result.is_ok());
        assert!(rx.recv().await.is_none());
        assert!(!playback.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_clip_preempts_old() {
        let playback = AudioPlayback::new(Arc::new(TimedSink));
        let (tx, mut rx) = mpsc::unbounded_channel();

        playback.play_audio(clip(100), channel("old", &tx));
        playback.play_audio(clip(5), channel("new", &tx));
        drop(tx);

        let (tag, _) = rx.recv().await.unwrap();
        assert_eq!(tag, "new");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_suppresses_on_end() {
        let playback = AudioPlayback::new(Arc::new(TimedSink));
        let (tx, mut rx) = mpsc::unbounded_channel();

        playback.play_audio(clip(5), channel("a", &tx));
        playback.stop_audio();
        playback.stop_audio();
        drop(tx);

        assert!(rx.recv().await.is_none());
        assert!(!playback.is_playing());
    }

    #[tokio::test]
    async fn test_failure_is_reported() {
        let playback = AudioPlayback::new(Arc::new(TimedSink));
        let (tx, mut rx) = mpsc::unbounded_channel();

        playback.play_audio(clip(0), channel("a", &tx));
        drop(tx);

        let (_, result) = rx.recv().await.unwrap();
        assert!(matches!(result, Err(Error::Playback(_))));
    }

    #[tokio::test]
    async fn test_dropping_playback_halts_sink() {
        let sink = Arc::new(EndlessSink::default());
        let playback = AudioPlayback::new(sink.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        playback.play_audio(clip(5), channel("a", &tx));
        drop(tx);
        tokio::task::yield_now().await;
        assert_eq!(sink.halted.load(Ordering::SeqCst), 0);

        drop(playback);

        assert!(rx.recv().await.is_none());
        assert_eq!(sink.halted.load(Ordering::SeqCst), 1);
    }
}
