//! Speech-synthesis collaborator contract and implementations.

use async_trait::async_trait;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::audio::Utterance;
use crate::error::TtsError;

/// Trait for speech-synthesis collaborators.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Synthesize the text into playable audio within the timeout.
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        timeout: Duration,
    ) -> Result<Utterance, TtsError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// A scripted synthesis provider for tests.
pub struct MockTtsProvider {
    responses: Mutex<Vec<Result<Utterance, TtsError>>>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

impl MockTtsProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_responses(responses: Vec<Result<Utterance, TtsError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Texts passed to synthesize, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockTtsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtsProvider for MockTtsProvider {
    async fn synthesize(
        &self,
        text: &str,
        _voice: &str,
        _timeout: Duration,
    ) -> Result<Utterance, TtsError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().unwrap().push(text.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            // Default: audio length proportional to text length
            let num_samples = 800 * text.len().max(1);
            Ok(Utterance::silence(16_000, 1, num_samples))
        } else {
            responses.remove(0)
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// ElevenLabs HTTP synthesis provider.
///
/// Requests raw PCM at 16 kHz so the result feeds the playback path
/// without a decode step.
pub struct ElevenLabsProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl ElevenLabsProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsProvider {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        timeout: Duration,
    ) -> Result<Utterance, TtsError> {
        let url = format!(
            "{}/text-to-speech/{voice}?output_format=pcm_16000",
            self.base_url
        );

        let body = serde_json::json!({
            "text": text,
            "model_id": "eleven_turbo_v2_5",
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.75,
            },
        });

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TtsError::Timeout { timeout }
                } else {
                    TtsError::RequestFailed {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TtsError::VoiceUnavailable {
                voice: voice.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::RequestFailed {
                message: format!("API returned {status}: {body}"),
            });
        }

        let bytes = response.bytes().await.map_err(|e| TtsError::RequestFailed {
            message: format!("response read failed: {e}"),
        })?;

        // pcm_16000 is 16-bit little-endian mono
        let pcm: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let samples = crate::audio::convert::i16_to_f32(&pcm);

        if samples.is_empty() {
            return Err(TtsError::RequestFailed {
                message: "empty audio response".into(),
            });
        }

        Ok(Utterance::new(samples, 16_000, 1))
    }

    fn name(&self) -> &str {
        "elevenlabs"
    }
}

/// Offline fallback synthesis: renders text as a sequence of soft tones,
/// one per word, so the device can still acknowledge the listener when
/// the network synthesis path is down.
pub struct ToneTtsProvider {
    sample_rate: u32,
}

impl ToneTtsProvider {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    fn render_tone(&self, frequency: f32, duration_secs: f32, out: &mut Vec<f32>) {
        let count = (duration_secs * self.sample_rate as f32) as usize;
        let fade = (count / 10).max(1);
        for i in 0..count {
            let t = i as f32 / self.sample_rate as f32;
            let mut sample = (2.0 * PI * frequency * t).sin() * 0.3;
            // short fade in/out avoids clicks between tones
            if i < fade {
                sample *= i as f32 / fade as f32;
            } else if i >= count - fade {
                sample *= (count - i) as f32 / fade as f32;
            }
            out.push(sample);
        }
    }
}

impl Default for ToneTtsProvider {
    fn default() -> Self {
        Self::new(16_000)
    }
}

#[async_trait]
impl TtsProvider for ToneTtsProvider {
    async fn synthesize(
        &self,
        text: &str,
        _voice: &str,
        _timeout: Duration,
    ) -> Result<Utterance, TtsError> {
        let words = text.split_whitespace().count().max(1).min(8);
        let mut samples = Vec::new();
        for i in 0..words {
            // gentle alternating pitch contour
            let frequency = if i % 2 == 0 { 523.25 } else { 659.25 };
            self.render_tone(frequency, 0.12, &mut samples);
            samples.extend(std::iter::repeat(0.0).take(self.sample_rate as usize / 20));
        }
        Ok(Utterance::new(samples, self.sample_rate, 1))
    }

    fn name(&self) -> &str {
        "tone"
    }
}
