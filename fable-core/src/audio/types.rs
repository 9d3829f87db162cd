//! Core audio data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A captured or synthesized span of audio. Internal representation is
/// always f32 samples in -1.0..1.0.
///
/// An utterance is owned exclusively by the active session and discarded
/// once the transcription stage completes or the session aborts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    /// Audio samples in f32 format (-1.0 to 1.0).
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g., 16000).
    pub sample_rate: u32,
    /// Number of audio channels (1 = mono, 2 = stereo).
    pub channels: u16,
    /// When capture of this audio began.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When capture ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Utterance {
    /// Create a new utterance from samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            started_at: None,
            ended_at: None,
        }
    }

    /// Create a silent utterance with the given parameters.
    pub fn silence(sample_rate: u32, channels: u16, num_samples: usize) -> Self {
        Self::new(vec![0.0; num_samples], sample_rate, channels)
    }

    /// Stamp capture start/end times.
    pub fn with_capture_window(mut self, started: DateTime<Utc>, ended: DateTime<Utc>) -> Self {
        self.started_at = Some(started);
        self.ended_at = Some(ended);
        self
    }

    /// Duration of this audio in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / (self.sample_rate as f32 * self.channels as f32)
    }

    /// Root mean square energy of the audio.
    pub fn rms_energy(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }

    /// Whether this utterance contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
