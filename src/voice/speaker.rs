//! Speaker output for synthesized replies

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use rubato::{FftFixedIn, Resampler};

use super::playback::AudioSink;
use crate::backend::AudioClip;
use crate::{Error, Result};

/// Poll interval while waiting for the stream to drain
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Grace period past the clip length before giving up on the device
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Requested resampler input chunk, rounded up to the FFT size by rubato
const RESAMPLE_CHUNK: usize = 1024;

const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Decoded PCM, mono
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Plays MP3 clips on the default output device
#[derive(Debug, Default, Clone, Copy)]
pub struct SpeakerSink;

impl SpeakerSink {
    /// Check that an output device exists
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "speaker output available"
        );
        Ok(Self)
    }

    /// Play raw mono samples, blocking until done or until `stop` is set
    ///
    /// # Errors
    ///
    /// Returns error if the output stream fails
    pub fn play_blocking(pcm: &Pcm, stop: &AtomicBool) -> Result<()> {
        if pcm.samples.is_empty() {
            return Ok(());
        }

        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device".to_string()))?;

        let (config, rate) = output_config(&device, pcm.sample_rate)?;
        let samples = if rate == pcm.sample_rate {
            pcm.samples.clone()
        } else {
            resample(&pcm.samples, pcm.sample_rate, rate)?
        };

        let channels = usize::from(config.channels);
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let stream_error = Arc::new(Mutex::new(None::<String>));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);
            let stream_error = Arc::clone(&stream_error);

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = samples.get(pos).copied().unwrap_or(0.0);
                            frame.fill(sample);
                            if pos < samples.len() {
                                pos += 1;
                            }
                        }
                        position.store(pos, Ordering::Relaxed);
                        if pos >= samples.len() {
                            finished.store(true, Ordering::Release);
                        }
                    },
                    move |err| {
                        tracing::error!(error = %err, "speaker stream error");
                        *stream_error.lock().unwrap_or_else(PoisonError::into_inner) =
                            Some(err.to_string());
                    },
                    None,
                )
                .map_err(|e| Error::Playback(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;

        let duration_ms = (samples.len() as u64 * 1000) / u64::from(rate);
        let deadline = Instant::now() + Duration::from_millis(duration_ms) + DRAIN_GRACE;

        loop {
            if stop.load(Ordering::Acquire) {
                tracing::debug!("speaker halted");
                return Ok(());
            }
            if let Some(err) = stream_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                return Err(Error::Playback(err));
            }
            if finished.load(Ordering::Acquire) || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        // Let the last buffer reach the device
        std::thread::sleep(Duration::from_millis(100));
        drop(stream);

        tracing::debug!(samples = samples.len(), rate, "speaker playback complete");
        Ok(())
    }
}

#[async_trait]
impl AudioSink for SpeakerSink {
    async fn play(&self, audio: &AudioClip) -> Result<()> {
        let stop = Arc::new(AtomicBool::new(false));
        let _halt = HaltOnDrop(Arc::clone(&stop));
        let audio = audio.clone();

        tokio::task::spawn_blocking(move || {
            let pcm = decode_mp3(audio.bytes())?;
            Self::play_blocking(&pcm, &stop)
        })
        .await
        .map_err(|e| Error::Playback(format!("playback thread failed: {e}")))?
    }
}

/// Sets the stop flag when the playing future is dropped
struct HaltOnDrop(Arc<AtomicBool>);

impl Drop for HaltOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Find an output config for `rate`, falling back to the device default
fn output_config(device: &cpal::Device, rate: u32) -> Result<(StreamConfig, u32)> {
    let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels
            && c.min_sample_rate() <= SampleRate(rate)
            && c.max_sample_rate() >= SampleRate(rate)
    };

    let exact = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?
        .find(|c| supports(c, 1))
        .or_else(|| {
            // Fallback: try stereo
            device
                .supported_output_configs()
                .ok()?
                .find(|c| supports(c, 2))
        });

    if let Some(range) = exact {
        return Ok((range.with_sample_rate(SampleRate(rate)).config(), rate));
    }

    let default = device
        .default_output_config()
        .map_err(|e| Error::Playback(e.to_string()))?;
    let config: StreamConfig = default.config();
    let device_rate = config.sample_rate.0;
    tracing::debug!(clip_rate = rate, device_rate, "resampling for output device");
    Ok((config, device_rate))
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the bytes are not decodable MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Pcm> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or_default();
                }

                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(Error::Playback("clip contains no audio frames".to_string()));
    }

    Ok(Pcm {
        samples,
        sample_rate,
    })
}

/// Resample mono audio with rubato's FFT resampler
///
/// The input is padded to whole chunks and the filter delay trimmed, so the
/// output is `len * to / from` samples long.
///
/// # Errors
///
/// Returns error if the resampler cannot be built for the rate pair
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f64>::new(
        from as usize,
        to as usize,
        RESAMPLE_CHUNK,
        RESAMPLE_SUB_CHUNKS,
        1,
    )
    .map_err(|e| Error::Playback(format!("resampler init failed: {e}")))?;

    let expected = (samples.len() as u64 * u64::from(to) / u64::from(from)) as usize;
    let delay = resampler.output_delay();
    let chunk_size = resampler.input_frames_next();

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output: Vec<f64> = Vec::with_capacity(expected + delay);

    for chunk in input.chunks(chunk_size) {
        let wave: [&[f64]; 1] = [chunk];
        let frames = if chunk.len() == chunk_size {
            resampler.process(&wave[..], None)
        } else {
            resampler.process_partial(Some(&wave[..]), None)
        }
        .map_err(|e| Error::Playback(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&frames[0]);
    }

    // Drain the filter tail
    let flush: Option<&[&[f64]]> = None;
    while output.len() < expected + delay {
        let frames = resampler
            .process_partial(flush, None)
            .map_err(|e| Error::Playback(format!("resampling failed: {e}")))?;
        if frames[0].is_empty() {
            break;
        }
        output.extend_from_slice(&frames[0]);
    }

    Ok(output
        .iter()
        .skip(delay)
        .take(expected)
        .map(|&s| s as f32)
        .collect())
}
