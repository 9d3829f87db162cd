//! Configuration system for Fable.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! environment. Configuration is loaded once at startup from
//! `~/.config/fable/config.toml` (or `/etc/fable/config.toml` on the device)
//! and `FABLE_`-prefixed environment variables, then passed by reference into
//! every component. There are no process-wide mutable globals.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Which wake detection backend to run. Resolved once at startup into a
/// concrete backend implementation; no string-keyed dispatch at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeBackendKind {
    /// ONNX wake-word classifier loaded from a model file.
    #[default]
    Neural,
    /// Picovoice Porcupine commercial engine (requires access key).
    Porcupine,
    /// Physical push button on a GPIO line.
    Button,
}

/// Top-level configuration for the Fable daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FableConfig {
    pub wake: WakeConfig,
    pub audio: AudioConfig,
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub monitor: MonitorConfig,
    pub session: SessionConfig,
    pub test_channel: TestChannelConfig,
}

/// Configuration for wake word detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeConfig {
    /// Which backend to run.
    pub backend: WakeBackendKind,
    /// Minimum confidence for a wake event to be accepted. A score exactly
    /// equal to the threshold is accepted.
    pub threshold: f32,
    /// Path to the wake word model file (neural and porcupine backends).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
    /// Porcupine access key (porcupine backend only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    /// GPIO line offset for the button backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_gpio: Option<u32>,
    /// Whether to also run the button backend as a fallback when the
    /// primary backend fails to start.
    pub button_fallback: bool,
    /// Wake phrase label reported for backends that do not classify
    /// (button, porcupine single-keyword).
    pub label: String,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            backend: WakeBackendKind::Neural,
            threshold: 0.5,
            model_path: None,
            access_key: None,
            button_gpio: None,
            button_fallback: true,
            label: "hey_fable".to_string(),
        }
    }
}

/// Configuration for audio capture and playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Capture channel count.
    pub channels: u16,
    /// Maximum utterance length in seconds.
    pub max_record_secs: f32,
    /// Audio input device name (None = system default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    /// Audio output device name (None = system default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            max_record_secs: 10.0,
            input_device: None,
            output_device: None,
        }
    }
}

/// Configuration for the speech-to-text collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Per-stage timeout in seconds.
    pub timeout_secs: u64,
    /// Language hint (e.g., "en-US").
    pub language: String,
    /// API base URL for the recognizer.
    pub base_url: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            language: "en-US".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

/// Configuration for the response-generation collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Per-stage timeout in seconds.
    pub timeout_secs: u64,
    /// Model name.
    pub model: String,
    /// Maximum exchanges kept in the in-memory history window.
    pub history_limit: usize,
    /// Listener age used to shape the response profile.
    pub listener_age: u8,
    /// Soft cap on response length in words.
    pub max_response_words: usize,
    /// API base URL.
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 8,
            model: "gemini-2.5-flash".to_string(),
            history_limit: 10,
            listener_age: 5,
            max_response_words: 150,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

/// Configuration for the speech-synthesis collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Per-stage timeout in seconds.
    pub timeout_secs: u64,
    /// Voice profile identifier for the primary synthesizer.
    pub voice: String,
    /// API base URL for the primary synthesizer.
    pub base_url: String,
    /// Optional pre-recorded apology clip played when every synthesis path
    /// fails (WAV). When absent a generated tone sequence is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apology_clip: Option<PathBuf>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 8,
            voice: "ember".to_string(),
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            apology_clip: None,
        }
    }
}

/// Configuration for the resource monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Sampling interval in seconds.
    pub interval_secs: u64,
    /// Absolute process memory ceiling in MB. Crossing it triggers cleanup.
    pub memory_ceiling_mb: u64,
    /// System memory percentage threshold. An independent cleanup trigger.
    pub memory_ceiling_percent: f32,
    /// Number of breaches within `breach_window_secs` that escalates to a
    /// health-degraded signal.
    pub breach_escalation_count: u32,
    /// Window for counting repeated breaches, in seconds.
    pub breach_window_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            memory_ceiling_mb: 350,
            memory_ceiling_percent: 85.0,
            breach_escalation_count: 3,
            breach_window_secs: 300,
        }
    }
}

/// Configuration for session timing and shutdown behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Overall wall-clock budget for one wake-to-response cycle, in seconds.
    pub target_response_secs: u64,
    /// Grace period given to an active session on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_response_secs: 15,
            shutdown_grace_secs: 5,
        }
    }
}

/// Configuration for the test injection channel.
///
/// Disabled by default. When enabled, wake events can be injected over an
/// owner-only Unix socket; never a world-writable pipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestChannelConfig {
    /// Whether the injection socket is created at all.
    pub enabled: bool,
    /// Socket path. Defaults to a private runtime directory.
    pub socket_path: PathBuf,
    /// Whether injected events may bypass the confidence threshold.
    pub bypass_threshold: bool,
}

impl Default for TestChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            socket_path: PathBuf::from("/run/fable/inject.sock"),
            bypass_threshold: false,
        }
    }
}

impl SttConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl TtsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SessionConfig {
    pub fn target_response_time(&self) -> Duration {
        Duration::from_secs(self.target_response_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl FableConfig {
    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.wake.threshold) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "wake.threshold must be within [0, 1], got {}",
                    self.wake.threshold
                ),
            });
        }
        if self.session.target_response_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "session.target_response_secs must be positive".into(),
            });
        }
        if self.monitor.memory_ceiling_mb == 0 {
            return Err(ConfigError::Invalid {
                message: "monitor.memory_ceiling_mb must be positive".into(),
            });
        }
        if !(0.0..=100.0).contains(&self.monitor.memory_ceiling_percent) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "monitor.memory_ceiling_percent must be within [0, 100], got {}",
                    self.monitor.memory_ceiling_percent
                ),
            });
        }
        match self.wake.backend {
            WakeBackendKind::Neural | WakeBackendKind::Porcupine => {
                if self.wake.model_path.is_none() {
                    return Err(ConfigError::Invalid {
                        message: format!("wake.model_path required for {:?} backend", self.wake.backend),
                    });
                }
            }
            WakeBackendKind::Button => {
                if self.wake.button_gpio.is_none() {
                    return Err(ConfigError::Invalid {
                        message: "wake.button_gpio required for button backend".into(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Load configuration with layering: defaults -> system/user config file ->
/// environment variables (`FABLE_WAKE__THRESHOLD`, `FABLE_MONITOR__INTERVAL_SECS`, ...).
pub fn load_config(explicit_path: Option<&Path>) -> std::result::Result<FableConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(FableConfig::default()));

    // System-level config (typical on the device image)
    let system_config = Path::new("/etc/fable/config.toml");
    if system_config.exists() {
        figment = figment.merge(Toml::file(system_config));
    }

    // User-level config
    if let Some(dirs) = directories::ProjectDirs::from("dev", "fable", "fable") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Explicit path wins over both
    if let Some(path) = explicit_path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("FABLE_").split("__"));

    let config: FableConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}
