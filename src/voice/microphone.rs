//! Microphone input
//!
//! The cpal callback downmixes each buffer to mono and hands it over a
//! channel; whoever holds the [`MicInput`] decides what to do with it.

use std::io::Cursor;
use std::sync::mpsc::{self, Receiver};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Preferred capture rate; 16 kHz mono is what speech recognizers want
pub const SAMPLE_RATE: u32 = 16000;

/// Whether the host exposes a default input device
#[must_use]
pub fn input_available() -> bool {
    cpal::default_host().default_input_device().is_some()
}

/// A running input stream and the receiving end of its sample channel
///
/// Not `Send`: the stream must stay on the thread that opened it. Dropping
/// the value closes the device.
pub struct MicInput {
    _stream: Stream,
    frames: Receiver<Vec<f32>>,
    sample_rate: u32,
}

impl MicInput {
    /// Open the default input device and start streaming
    ///
    /// Uses mono 16 kHz when the device offers it, otherwise the device's own
    /// config downmixed to mono.
    ///
    /// # Errors
    ///
    /// Returns error if there is no input device or the stream cannot start
    pub fn open() -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let config = input_config(&device)?;
        let channels = usize::from(config.channels).max(1);
        let sample_rate = config.sample_rate.0;

        let (tx, frames) = mpsc::channel();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // The receiver is gone once recording ends
                    let _ = tx.send(downmix(data, channels));
                },
                |err| tracing::error!(error = %err, "microphone stream error"),
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "microphone streaming"
        );

        Ok(Self {
            _stream: stream,
            frames,
            sample_rate,
        })
    }

    /// Mono sample buffers in arrival order
    #[must_use]
    pub const fn frames(&self) -> &Receiver<Vec<f32>> {
        &self.frames
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn input_config(device: &cpal::Device) -> Result<StreamConfig> {
    let preferred = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        });

    if let Some(range) = preferred {
        return Ok(range.with_sample_rate(SampleRate(SAMPLE_RATE)).config());
    }

    let config = device
        .default_input_config()
        .map_err(|e| Error::Audio(e.to_string()))?
        .config();
    tracing::debug!(
        rate = config.sample_rate.0,
        channels = config.channels,
        "no mono 16kHz input, using device default"
    );
    Ok(config)
}

/// Average interleaved frames down to one channel
#[allow(clippy::cast_precision_loss)]
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Encode mono samples as a 16-bit PCM WAV file, the upload format for transcription
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_error = |e: hound::Error| Error::Audio(format!("WAV encoding failed: {e}"));

    let mut out = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    let mut writer = hound::WavWriter::new(&mut out, spec).map_err(wav_error)?;
    let mut pcm = writer.get_i16_writer(u32::try_from(samples.len()).map_err(|_| {
        Error::Audio("utterance too long to encode".to_string())
    })?);
    for &sample in samples {
        pcm.write_sample(to_pcm16(sample));
    }
    pcm.flush().map_err(wav_error)?;
    writer.finalize().map_err(wav_error)?;

    Ok(out.into_inner())
}

/// Scale to i16, clipping anything outside [-1, 1]
#[allow(clippy::cast_possible_truncation)]
fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}
