//! Fable core library.
//!
//! A hands-free spoken-interaction pipeline for small always-on devices:
//! wake-phrase detection, utterance capture, transcription, response
//! generation, speech synthesis, and playback, driven by a single-session
//! state machine under a fixed response-time budget and a memory ceiling.
//!
//! The crate is organized around a few seams:
//!
//! - [`wake`] — the [`wake::WakeBackend`] trait and its implementations
//!   (on-device neural scoring, the Porcupine engine, a GPIO button, and
//!   an access-controlled test injection socket).
//! - [`audio`] — capture/playback via [`audio::AudioDevice`] and the
//!   [`audio::Utterance`] sample buffer.
//! - [`services`] — timeout-bounded collaborator traits for speech-to-text,
//!   response generation, and synthesis, with HTTP and mock providers.
//! - [`orchestrator`] — the Idle/Listening/Processing/Speaking/Error
//!   state machine that ties the stages together.
//! - [`monitor`] — periodic memory sampling against configured ceilings.

pub mod audio;
pub mod config;
pub mod error;
pub mod feedback;
pub mod monitor;
pub mod orchestrator;
pub mod services;
pub mod session;
pub mod wake;

pub use config::{load_config, FableConfig, WakeBackendKind};
pub use error::{FableError, Result};
pub use orchestrator::{Orchestrator, OrchestratorEvent};
pub use session::{InteractionSession, InteractionState, SessionClock};
pub use wake::{WakeBackend, WakeEvent, WakeSource};
