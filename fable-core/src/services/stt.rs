//! Speech-to-text collaborator contract and implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::audio::{convert, Utterance};
use crate::error::SttError;

/// Result of a transcription request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    /// The transcribed text.
    pub text: String,
    /// Overall confidence in [0, 1] where the recognizer reports one.
    pub confidence: f32,
    /// Detected or requested language code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Trait for speech-to-text collaborators.
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Transcribe an utterance within the given timeout.
    async fn transcribe(
        &self,
        audio: &Utterance,
        language: &str,
        timeout: Duration,
    ) -> Result<Transcript, SttError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// A scripted STT provider for tests. Each queued entry is either a
/// transcript or an error, consumed in order.
pub struct MockSttProvider {
    responses: Mutex<Vec<Result<Transcript, SttError>>>,
    call_count: AtomicUsize,
}

impl MockSttProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with_responses(responses: Vec<Result<Transcript, SttError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Number of times `transcribe` was called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl Default for MockSttProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SttProvider for MockSttProvider {
    async fn transcribe(
        &self,
        _audio: &Utterance,
        _language: &str,
        _timeout: Duration,
    ) -> Result<Transcript, SttError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Err(SttError::Unsupported {
                detail: "no mock responses queued".into(),
            })
        } else {
            responses.remove(0)
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Whisper-compatible HTTP recognizer (multipart WAV upload).
pub struct WhisperHttpProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl WhisperHttpProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "whisper-1".to_string(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl SttProvider for WhisperHttpProvider {
    async fn transcribe(
        &self,
        audio: &Utterance,
        language: &str,
        timeout: Duration,
    ) -> Result<Transcript, SttError> {
        if audio.is_empty() {
            return Ok(Transcript {
                text: String::new(),
                confidence: 0.0,
                language: None,
            });
        }

        let wav_bytes = convert::encode_wav(audio).map_err(|e| SttError::Unsupported {
            detail: e.to_string(),
        })?;

        let part = reqwest::multipart::Part::bytes(wav_bytes)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| SttError::Unsupported {
                detail: format!("MIME error: {e}"),
            })?;

        // The API wants bare language codes ("en"), not locales ("en-US")
        let lang = language.split('-').next().unwrap_or(language).to_string();
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", lang)
            .text("response_format", "verbose_json".to_string());

        let url = format!("{}/audio/transcriptions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SttError::Timeout { timeout }
                } else {
                    SttError::TransientNetwork {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return if status.is_server_error() {
                Err(SttError::TransientNetwork {
                    message: format!("API returned {status}: {body}"),
                })
            } else {
                Err(SttError::Unsupported {
                    detail: format!("API returned {status}: {body}"),
                })
            };
        }

        let json: serde_json::Value =
            response.json().await.map_err(|e| SttError::TransientNetwork {
                message: format!("response read failed: {e}"),
            })?;

        Ok(Transcript {
            text: json["text"].as_str().unwrap_or("").to_string(),
            // The recognizer reports no per-result confidence
            confidence: 1.0,
            language: json["language"].as_str().map(|s| s.to_string()),
        })
    }

    fn name(&self) -> &str {
        "whisper-http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript(text: &str) -> Transcript {
        Transcript {
            text: text.into(),
            confidence: 0.95,
            language: Some("en".into()),
        }
    }

    #[tokio::test]
    async fn test_mock_returns_queued_in_order() {
        let mock = MockSttProvider::with_responses(vec![
            Ok(transcript("tell me a story")),
            Err(SttError::TransientNetwork {
                message: "reset".into(),
            }),
            Ok(transcript("about dragons")),
        ]);
        let audio = Utterance::silence(16000, 1, 480);

        let first = mock
            .transcribe(&audio, "en-US", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(first.text, "tell me a story");

        let second = mock.transcribe(&audio, "en-US", Duration::from_secs(5)).await;
        assert!(matches!(second, Err(SttError::TransientNetwork { .. })));

        let third = mock
            .transcribe(&audio, "en-US", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(third.text, "about dragons");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_empty_queue_errors() {
        let mock = MockSttProvider::new();
        let audio = Utterance::silence(16000, 1, 480);
        let result = mock.transcribe(&audio, "en-US", Duration::from_secs(5)).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_provider_names() {
        assert_eq!(MockSttProvider::new().name(), "mock");
        assert_eq!(
            WhisperHttpProvider::new("key", "https://api.example.com/v1").name(),
            "whisper-http"
        );
    }

    #[test]
    fn test_transcript_serde() {
        let t = transcript("hello");
        let json = serde_json::to_string(&t).unwrap();
        let parsed: Transcript = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.text, "hello");
        assert_eq!(parsed.language, Some("en".into()));
    }
}
