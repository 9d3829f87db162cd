//! Wake detection: event types, the backend trait, and its implementations.
//!
//! A backend owns its underlying resource (model file, engine handle, GPIO
//! line, injection socket) and lazily initializes it on `start()`, so no
//! memory or CPU is spent before first use. `start()` fails with
//! `WakeError::BackendUnavailable` when a required asset is missing; the
//! caller logs it and keeps the process alive on any other enabled backend.
//!
//! Backends emit `WakeEvent`s over an mpsc channel. The orchestrator is
//! the sole consumer and ignores events while a session is active — there
//! is no queuing across sessions.

pub mod button;
pub mod neural;
pub mod porcupine;
pub mod testchan;

pub use button::ButtonBackend;
pub use neural::NeuralBackend;
pub use porcupine::PorcupineBackend;
pub use testchan::TestInjectionBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::WakeError;

/// Which kind of backend produced a wake event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeSource {
    Neural,
    Porcupine,
    Button,
    TestInjection,
}

/// A detected occurrence of the wake phrase (or button press).
/// Created by a backend, consumed exactly once by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeEvent {
    /// Label of the detected phrase (e.g., "hey_fable").
    pub label: String,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    /// Which backend produced the event.
    pub source: WakeSource,
    /// When the detection happened.
    pub timestamp: DateTime<Utc>,
}

impl WakeEvent {
    pub fn new(label: impl Into<String>, confidence: f32, source: WakeSource) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source,
            timestamp: Utc::now(),
        }
    }

    /// Whether this event passes the configured confidence threshold.
    /// A score exactly at the threshold is accepted. Injected events may
    /// bypass the check only when the config explicitly allows it.
    pub fn passes_threshold(&self, threshold: f32, injection_bypass: bool) -> bool {
        if self.source == WakeSource::TestInjection && injection_bypass {
            return true;
        }
        self.confidence >= threshold
    }
}

/// One concrete implementation of wake detection.
#[async_trait]
pub trait WakeBackend: Send {
    /// Lazily initialize the underlying resource and begin emitting events
    /// into `events`. Fails with `BackendUnavailable` when a required asset
    /// is missing or invalid.
    async fn start(&mut self, events: mpsc::Sender<WakeEvent>) -> Result<(), WakeError>;

    /// Stop emitting and release the underlying resource.
    async fn stop(&mut self);

    /// Which source this backend reports.
    fn source(&self) -> WakeSource;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// A scripted backend for tests: emits the given events once started.
pub struct MockWakeBackend {
    events: Vec<WakeEvent>,
    started: bool,
}

impl MockWakeBackend {
    pub fn new(events: Vec<WakeEvent>) -> Self {
        Self {
            events,
            started: false,
        }
    }
}

#[async_trait]
impl WakeBackend for MockWakeBackend {
    async fn start(&mut self, events: mpsc::Sender<WakeEvent>) -> Result<(), WakeError> {
        if self.started {
            return Err(WakeError::AlreadyRunning {
                backend: "mock".into(),
            });
        }
        self.started = true;
        let scripted = std::mem::take(&mut self.events);
        tokio::spawn(async move {
            for event in scripted {
                if events.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    async fn stop(&mut self) {
        self.started = false;
    }

    fn source(&self) -> WakeSource {
        WakeSource::TestInjection
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_confidence_clamped() {
        let event = WakeEvent::new("hey_fable", 1.7, WakeSource::Neural);
        assert!((event.confidence - 1.0).abs() < f32::EPSILON);

        let event = WakeEvent::new("hey_fable", -0.3, WakeSource::Neural);
        assert!((event.confidence - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_threshold_boundary() {
        // Exactly at the threshold: accepted
        let event = WakeEvent::new("hey_fable", 0.5, WakeSource::Neural);
        assert!(event.passes_threshold(0.5, false));

        // Just below: rejected
        let event = WakeEvent::new("hey_fable", 0.499, WakeSource::Neural);
        assert!(!event.passes_threshold(0.5, false));
    }

    #[test]
    fn test_injection_bypass_only_for_injected_events() {
        let injected = WakeEvent::new("hey_fable", 0.1, WakeSource::TestInjection);
        assert!(injected.passes_threshold(0.9, true));
        assert!(!injected.passes_threshold(0.9, false));

        // Bypass never applies to real backends
        let real = WakeEvent::new("hey_fable", 0.1, WakeSource::Neural);
        assert!(!real.passes_threshold(0.9, true));
    }

    #[tokio::test]
    async fn test_mock_backend_emits_scripted_events() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut backend = MockWakeBackend::new(vec![
            WakeEvent::new("hey_fable", 0.9, WakeSource::TestInjection),
            WakeEvent::new("hey_fable", 0.4, WakeSource::TestInjection),
        ]);

        backend.start(tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!((first.confidence - 0.9).abs() < f32::EPSILON);
        let second = rx.recv().await.unwrap();
        assert!((second.confidence - 0.4).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_mock_backend_double_start_fails() {
        let (tx, _rx) = mpsc::channel(8);
        let mut backend = MockWakeBackend::new(Vec::new());
        backend.start(tx.clone()).await.unwrap();
        assert!(matches!(
            backend.start(tx).await,
            Err(WakeError::AlreadyRunning { .. })
        ));
    }

    #[test]
    fn test_event_serde() {
        let event = WakeEvent::new("hey_fable", 0.85, WakeSource::Button);
        let json = serde_json::to_string(&event).unwrap();
        let parsed: WakeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.label, "hey_fable");
        assert_eq!(parsed.source, WakeSource::Button);
    }
}
