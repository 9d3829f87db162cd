//! Response-generation collaborator contract and implementations.
//!
//! The device speaks to young listeners, so the generation profile bakes
//! in age-appropriate constraints: a system instruction shaped by the
//! configured listener age, strict safety settings, and a soft cap on
//! response length so playback fits the session budget.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::history::ConversationHistory;
use crate::error::LlmError;

/// Profile constraints applied to every generation request.
#[derive(Debug, Clone)]
pub struct ResponseProfile {
    /// Listener age the content must suit.
    pub listener_age: u8,
    /// Soft cap on response length in words.
    pub max_words: usize,
    /// Name the assistant answers to.
    pub persona: String,
}

impl Default for ResponseProfile {
    fn default() -> Self {
        Self {
            listener_age: 5,
            max_words: 150,
            persona: "Fable".to_string(),
        }
    }
}

impl ResponseProfile {
    /// Render the system instruction for this profile.
    pub fn system_instruction(&self) -> String {
        format!(
            "You are {persona}, a friendly storyteller speaking aloud to a \
             {age}-year-old child. Keep all content appropriate for age {age}. \
             Use simple, clear language, be encouraging and positive, and \
             avoid scary or violent content. Keep responses under {words} \
             words because they are spoken aloud.",
            persona = self.persona,
            age = self.listener_age,
            words = self.max_words,
        )
    }
}

/// Trait for response-generation collaborators.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a spoken response to the transcript, given recent history
    /// and the configured profile, within the timeout.
    async fn generate(
        &self,
        transcript: &str,
        history: &ConversationHistory,
        profile: &ResponseProfile,
        timeout: Duration,
    ) -> Result<String, LlmError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// A scripted generation provider for tests.
pub struct MockLlmProvider {
    responses: Mutex<Vec<Result<String, LlmError>>>,
    call_count: AtomicUsize,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with_responses(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn generate(
        &self,
        _transcript: &str,
        _history: &ConversationHistory,
        _profile: &ResponseProfile,
        _timeout: Duration,
    ) -> Result<String, LlmError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Err(LlmError::RequestFailed {
                message: "no mock responses queued".into(),
            })
        } else {
            responses.remove(0)
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Gemini generateContent HTTP provider.
pub struct GeminiProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Strict safety settings: the listener is a child, so every harm
    /// category blocks at the lowest threshold regardless of config.
    fn safety_settings() -> serde_json::Value {
        json!([
            {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_LOW_AND_ABOVE"},
            {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_LOW_AND_ABOVE"},
            {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_LOW_AND_ABOVE"},
            {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_LOW_AND_ABOVE"},
        ])
    }

    fn build_contents(
        transcript: &str,
        history: &ConversationHistory,
    ) -> Vec<serde_json::Value> {
        let mut contents = Vec::with_capacity(history.len() * 2 + 1);
        for exchange in history.iter() {
            contents.push(json!({"role": "user", "parts": [{"text": exchange.user}]}));
            contents.push(json!({"role": "model", "parts": [{"text": exchange.assistant}]}));
        }
        contents.push(json!({"role": "user", "parts": [{"text": transcript}]}));
        contents
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(
        &self,
        transcript: &str,
        history: &ConversationHistory,
        profile: &ResponseProfile,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let body = json!({
            "system_instruction": {"parts": [{"text": profile.system_instruction()}]},
            "contents": Self::build_contents(transcript, history),
            "safetySettings": Self::safety_settings(),
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout { timeout }
                } else {
                    LlmError::RequestFailed {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::QuotaExceeded {
                model: self.model.clone(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                message: format!("API returned {status}: {body}"),
            });
        }

        let json: serde_json::Value =
            response.json().await.map_err(|e| LlmError::RequestFailed {
                message: format!("response read failed: {e}"),
            })?;

        // A prompt blocked by the safety filter carries no candidates
        if let Some(reason) = json["promptFeedback"]["blockReason"].as_str() {
            return Err(LlmError::ContentRejected {
                reason: reason.to_string(),
            });
        }
        let candidate = &json["candidates"][0];
        if candidate["finishReason"].as_str() == Some("SAFETY") {
            return Err(LlmError::ContentRejected {
                reason: "candidate blocked for safety".into(),
            });
        }

        let text = candidate["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| LlmError::RequestFailed {
                message: "no text in response".into(),
            })?;

        Ok(text.trim().to_string())
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_instruction_reflects_profile() {
        let profile = ResponseProfile {
            listener_age: 7,
            max_words: 120,
            persona: "Fable".into(),
        };
        let instruction = profile.system_instruction();
        assert!(instruction.contains("7-year-old"));
        assert!(instruction.contains("under 120 words"));
        assert!(instruction.contains("Fable"));
    }

    #[test]
    fn test_build_contents_interleaves_history() {
        let mut history = ConversationHistory::new(5);
        history.push("tell me a story", "once upon a time");

        let contents = GeminiProvider::build_contents("what next", &history);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "what next");
    }

    #[tokio::test]
    async fn test_mock_returns_queued() {
        let mock = MockLlmProvider::with_responses(vec![
            Ok("once upon a time".into()),
            Err(LlmError::QuotaExceeded {
                model: "gemini-2.5-flash".into(),
            }),
        ]);
        let history = ConversationHistory::new(5);
        let profile = ResponseProfile::default();

        let first = mock
            .generate("hi", &history, &profile, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(first, "once upon a time");

        let second = mock
            .generate("hi", &history, &profile, Duration::from_secs(5))
            .await;
        assert!(matches!(second, Err(LlmError::QuotaExceeded { .. })));
        assert_eq!(mock.call_count(), 2);
    }
}
