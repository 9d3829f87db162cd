//! Audio device access.
//!
//! The physical device has a single owner at a time: the orchestrator holds
//! the handle and only touches it in the states the transition table allows
//! (capture while Listening, playback while Speaking or on the error
//! fallback). Capture and playback are blocking operations internally but
//! are exposed as awaitable calls running on the blocking pool, so the wake
//! and monitor tasks never stall behind them.
//!
//! `MockAudioDevice` is always available; `CpalDevice` requires the
//! `device` feature.

use async_trait::async_trait;
use std::sync::Mutex;

#[cfg(feature = "device")]
use crate::audio::convert;
use crate::audio::types::Utterance;
use crate::error::AudioError;

/// Capture and playback over one exclusive audio device.
#[async_trait]
pub trait AudioDevice: Send + Sync {
    /// Record up to `max_secs` of audio from the microphone.
    async fn record(&self, max_secs: f32) -> Result<Utterance, AudioError>;

    /// Play audio through the speaker, returning when playback finishes.
    async fn play(&self, audio: &Utterance) -> Result<(), AudioError>;

    /// Device name for logging.
    fn name(&self) -> &str;
}

/// A scripted audio device for tests: returns queued recordings and
/// remembers everything played.
pub struct MockAudioDevice {
    recordings: Mutex<Vec<Utterance>>,
    played: Mutex<Vec<Utterance>>,
}

impl MockAudioDevice {
    /// Create a mock with no queued recordings; `record` yields silence.
    pub fn new() -> Self {
        Self {
            recordings: Mutex::new(Vec::new()),
            played: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock with pre-queued recordings, returned in order.
    pub fn with_recordings(recordings: Vec<Utterance>) -> Self {
        Self {
            recordings: Mutex::new(recordings),
            played: Mutex::new(Vec::new()),
        }
    }

    /// Everything played through this device so far.
    pub fn played(&self) -> Vec<Utterance> {
        self.played.lock().unwrap().clone()
    }

    /// Number of playbacks so far.
    pub fn play_count(&self) -> usize {
        self.played.lock().unwrap().len()
    }
}

impl Default for MockAudioDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioDevice for MockAudioDevice {
    async fn record(&self, max_secs: f32) -> Result<Utterance, AudioError> {
        let mut queue = self.recordings.lock().unwrap();
        if queue.is_empty() {
            // A second of simulated silence, capped at the requested window
            let secs = max_secs.min(1.0);
            Ok(Utterance::silence(16_000, 1, (16_000.0 * secs) as usize))
        } else {
            Ok(queue.remove(0))
        }
    }

    async fn play(&self, audio: &Utterance) -> Result<(), AudioError> {
        self.played.lock().unwrap().push(audio.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// cpal-backed device (requires the `device` feature).
#[cfg(feature = "device")]
pub struct CpalDevice {
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Sample rate requested for capture.
    pub sample_rate: u32,
    /// Channel count requested for capture.
    pub channels: u16,
}

#[cfg(feature = "device")]
impl CpalDevice {
    pub fn new(
        input_device: Option<String>,
        output_device: Option<String>,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self {
            input_device,
            output_device,
            sample_rate,
            channels,
        }
    }

    fn find_input(&self) -> Result<cpal::Device, AudioError> {
        use cpal::traits::HostTrait;
        let host = cpal::default_host();
        match &self.input_device {
            None => host.default_input_device(),
            Some(name) => {
                use cpal::traits::DeviceTrait;
                host.input_devices()
                    .ok()
                    .and_then(|mut devs| {
                        devs.find(|d| d.name().map(|n| n.contains(name)).unwrap_or(false))
                    })
            }
        }
        .ok_or_else(|| AudioError::DeviceUnavailable {
            reason: "no input device found".into(),
        })
    }

    fn find_output(&self) -> Result<cpal::Device, AudioError> {
        use cpal::traits::HostTrait;
        let host = cpal::default_host();
        match &self.output_device {
            None => host.default_output_device(),
            Some(name) => {
                use cpal::traits::DeviceTrait;
                host.output_devices()
                    .ok()
                    .and_then(|mut devs| {
                        devs.find(|d| d.name().map(|n| n.contains(name)).unwrap_or(false))
                    })
            }
        }
        .ok_or_else(|| AudioError::DeviceUnavailable {
            reason: "no output device found".into(),
        })
    }
}

#[cfg(feature = "device")]
#[async_trait]
impl AudioDevice for CpalDevice {
    /// Capture at whatever format the hardware natively supports, then
    /// downmix and resample to the configured pipeline rate.
    async fn record(&self, max_secs: f32) -> Result<Utterance, AudioError> {
        use cpal::traits::{DeviceTrait, StreamTrait};
        use std::sync::Arc;

        let device = self.find_input()?;
        let supported =
            device
                .default_input_config()
                .map_err(|e| AudioError::DeviceUnavailable {
                    reason: e.to_string(),
                })?;
        let native_rate = supported.sample_rate().0;
        let native_channels = supported.channels();
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let target_rate = self.sample_rate;

        let started = chrono::Utc::now();
        let samples = tokio::task::spawn_blocking(move || {
            let buffer: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
            let writer = buffer.clone();
            let stream = match sample_format {
                cpal::SampleFormat::F32 => device.build_input_stream(
                    &config,
                    move |data: &[f32], _| {
                        writer.lock().unwrap().extend_from_slice(data);
                    },
                    |err| tracing::warn!(error = %err, "input stream error"),
                    None,
                ),
                cpal::SampleFormat::I16 => device.build_input_stream(
                    &config,
                    move |data: &[i16], _| {
                        writer.lock().unwrap().extend(convert::i16_to_f32(data));
                    },
                    |err| tracing::warn!(error = %err, "input stream error"),
                    None,
                ),
                other => {
                    return Err(AudioError::UnsupportedFormat {
                        detail: format!("input sample format {other}"),
                    });
                }
            }
            .map_err(|e| AudioError::CaptureFailed {
                reason: e.to_string(),
            })?;
            stream.play().map_err(|e| AudioError::CaptureFailed {
                reason: e.to_string(),
            })?;
            std::thread::sleep(std::time::Duration::from_secs_f32(max_secs));
            drop(stream);
            let samples = std::mem::take(&mut *buffer.lock().unwrap());
            Ok::<_, AudioError>(samples)
        })
        .await
        .map_err(|e| AudioError::CaptureFailed {
            reason: format!("capture task failed: {e}"),
        })??;

        let samples = convert::normalize_capture(samples, native_rate, native_channels, target_rate);
        Ok(Utterance::new(samples, target_rate, 1)
            .with_capture_window(started, chrono::Utc::now()))
    }

    /// Play through the output device's native config, resampling the
    /// clip and duplicating mono across the hardware channels.
    async fn play(&self, audio: &Utterance) -> Result<(), AudioError> {
        use cpal::traits::{DeviceTrait, StreamTrait};
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let device = self.find_output()?;
        let supported =
            device
                .default_output_config()
                .map_err(|e| AudioError::DeviceUnavailable {
                    reason: e.to_string(),
                })?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(AudioError::UnsupportedFormat {
                detail: format!("output sample format {}", supported.sample_format()),
            });
        }
        let out_rate = supported.sample_rate().0;
        let out_channels = supported.channels() as usize;
        let config: cpal::StreamConfig = supported.into();

        let mono = if audio.channels == 2 {
            convert::stereo_to_mono(&audio.samples)
        } else {
            audio.samples.clone()
        };
        let samples = Arc::new(convert::resample(&mono, audio.sample_rate, out_rate));
        let duration = samples.len() as f32 / out_rate as f32;

        tokio::task::spawn_blocking(move || {
            let cursor = Arc::new(AtomicUsize::new(0));
            let reader_cursor = cursor.clone();
            let reader_samples = samples.clone();
            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _| {
                        let frames = data.len() / out_channels;
                        let start = reader_cursor.fetch_add(frames, Ordering::SeqCst);
                        for (i, frame) in data.chunks_mut(out_channels).enumerate() {
                            let sample = reader_samples.get(start + i).copied().unwrap_or(0.0);
                            for slot in frame {
                                *slot = sample;
                            }
                        }
                    },
                    |err| tracing::warn!(error = %err, "output stream error"),
                    None,
                )
                .map_err(|e| AudioError::PlaybackFailed {
                    reason: e.to_string(),
                })?;
            stream.play().map_err(|e| AudioError::PlaybackFailed {
                reason: e.to_string(),
            })?;
            // Sleep for the clip length plus a small drain margin
            std::thread::sleep(std::time::Duration::from_secs_f32(duration + 0.1));
            Ok::<_, AudioError>(())
        })
        .await
        .map_err(|e| AudioError::PlaybackFailed {
            reason: format!("playback task failed: {e}"),
        })??;

        Ok(())
    }

    fn name(&self) -> &str {
        "cpal"
    }
}
