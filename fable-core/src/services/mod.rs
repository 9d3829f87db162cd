//! External collaborator contracts: speech-to-text, response generation,
//! and speech synthesis, plus the in-memory conversation history.
//!
//! Each collaborator is a black box behind a trait with a uniform
//! timeout-bounded request contract. HTTP providers and mocks live side
//! by side; the orchestrator only sees the traits.

pub mod history;
pub mod llm;
pub mod stt;
pub mod tts;

pub use history::ConversationHistory;
pub use llm::{GeminiProvider, LlmProvider, MockLlmProvider, ResponseProfile};
pub use stt::{MockSttProvider, SttProvider, Transcript, WhisperHttpProvider};
pub use tts::{ElevenLabsProvider, MockTtsProvider, ToneTtsProvider, TtsProvider};
