//! Error types for the Fable core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering wake detection, the speech pipeline collaborators, session
//! control, resource monitoring, and configuration.
//!
//! Propagation policy: every stage-level error is caught by the
//! orchestrator and mapped to the `Error` state with an audible fallback.
//! Nothing in this module is allowed to take the process down.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for the Fable core library.
#[derive(Debug, thiserror::Error)]
pub enum FableError {
    #[error("Wake detection error: {0}")]
    Wake(#[from] WakeError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Speech-to-text error: {0}")]
    Stt(#[from] SttError),

    #[error("Response generation error: {0}")]
    Llm(#[from] LlmError),

    #[error("Speech synthesis error: {0}")]
    Tts(#[from] TtsError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Resource monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from wake word backends.
#[derive(Debug, thiserror::Error)]
pub enum WakeError {
    /// A backend cannot initialize: missing model, credential, or hardware.
    /// Non-fatal — the process continues with any other enabled backend.
    #[error("Backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Backend '{backend}' is already running")]
    AlreadyRunning { backend: String },

    #[error("Malformed injection command: {line:?}")]
    MalformedCommand { line: String },
}

/// Errors from audio capture, playback, and format conversion.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Audio device unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    #[error("Capture failed: {reason}")]
    CaptureFailed { reason: String },

    #[error("Playback failed: {reason}")]
    PlaybackFailed { reason: String },

    #[error("Unsupported audio format: {detail}")]
    UnsupportedFormat { detail: String },
}

/// Errors from the speech-to-text collaborator.
#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("Transcription timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Recoverable failure; retried once within the remaining budget.
    #[error("Transient network failure: {message}")]
    TransientNetwork { message: String },

    #[error("Audio not supported by recognizer: {detail}")]
    Unsupported { detail: String },
}

/// Errors from the response-generation collaborator.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Generation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Quota exceeded for model {model}")]
    QuotaExceeded { model: String },

    #[error("Content rejected by safety filter: {reason}")]
    ContentRejected { reason: String },

    #[error("Generation request failed: {message}")]
    RequestFailed { message: String },
}

/// Errors from the speech-synthesis collaborator.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("Synthesis timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Voice '{voice}' unavailable")]
    VoiceUnavailable { voice: String },

    #[error("Synthesis request failed: {message}")]
    RequestFailed { message: String },
}

/// Errors from session control and the state machine.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session deadline passed mid-pipeline. Aborts to the fallback
    /// path; never propagates as a crash.
    #[error("Session budget exceeded at stage '{stage}'")]
    BudgetExceeded { stage: String },

    /// An event the transition table does not permit. Logged as a defect
    /// signal; state is forced to Error then recovered to Idle.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("A session is already active")]
    AlreadyActive,
}

/// Errors from the resource monitor.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Memory ceiling exceeded: {used_mb} MB used, limit {limit_mb} MB")]
    CeilingExceeded { used_mb: u64, limit_mb: u64 },

    #[error("Failed to sample process resources: {reason}")]
    SampleFailed { reason: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `FableError`.
pub type Result<T> = std::result::Result<T, FableError>;
