//! Physical button backend: polls a GPIO line via sysfs and emits a
//! full-confidence wake event on each press (rising edge).
//!
//! Serves as the fallback path when the model-based backends cannot
//! initialize, so the device stays usable without any wake model.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{WakeBackend, WakeEvent, WakeSource};
use crate::error::WakeError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Ignore presses for this long after one fires.
const DEBOUNCE: Duration = Duration::from_millis(300);

pub struct ButtonBackend {
    gpio_line: u32,
    label: String,
    value_path: PathBuf,
    cancel: Option<CancellationToken>,
}

impl ButtonBackend {
    pub fn new(gpio_line: u32, label: impl Into<String>) -> Self {
        let value_path = PathBuf::from(format!("/sys/class/gpio/gpio{gpio_line}/value"));
        Self {
            gpio_line,
            label: label.into(),
            value_path,
            cancel: None,
        }
    }

    /// Override the sysfs value path (tests point this at a temp file).
    pub fn with_value_path(mut self, path: PathBuf) -> Self {
        self.value_path = path;
        self
    }
}

async fn read_level(path: &PathBuf) -> Option<bool> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    Some(raw.trim() == "1")
}

#[async_trait]
impl WakeBackend for ButtonBackend {
    async fn start(&mut self, events: mpsc::Sender<WakeEvent>) -> Result<(), WakeError> {
        if self.cancel.is_some() {
            return Err(WakeError::AlreadyRunning {
                backend: "button".into(),
            });
        }
        if !self.value_path.exists() {
            return Err(WakeError::BackendUnavailable {
                backend: "button".into(),
                reason: format!(
                    "GPIO line {} not exported ({} missing)",
                    self.gpio_line,
                    self.value_path.display()
                ),
            });
        }

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let label = self.label.clone();
        let value_path = self.value_path.clone();

        tokio::spawn(async move {
            tracing::info!(path = %value_path.display(), "button wake detection started");
            let mut was_pressed = read_level(&value_path).await.unwrap_or(false);
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let pressed = match read_level(&value_path).await {
                            Some(level) => level,
                            None => {
                                tracing::warn!("button backend lost its GPIO line");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                                continue;
                            }
                        };
                        if pressed && !was_pressed {
                            let event = WakeEvent::new(label.clone(), 1.0, WakeSource::Button);
                            if events.send(event).await.is_err() {
                                break;
                            }
                            tokio::time::sleep(DEBOUNCE).await;
                        }
                        was_pressed = pressed;
                    }
                }
            }
            tracing::info!("button wake detection stopped");
        });

        self.cancel = Some(cancel);
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }

    fn source(&self) -> WakeSource {
        WakeSource::Button
    }

    fn name(&self) -> &str {
        "button"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_fails_without_exported_line() {
        let mut backend = ButtonBackend::new(17, "hey_fable")
            .with_value_path(PathBuf::from("/nonexistent/gpio17/value"));
        let (tx, _rx) = mpsc::channel(4);
        let err = backend.start(tx).await.unwrap_err();
        assert!(matches!(err, WakeError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_press_emits_full_confidence_event() {
        let dir = tempfile::tempdir().unwrap();
        let value = dir.path().join("value");
        std::fs::write(&value, "0\n").unwrap();

        let mut backend = ButtonBackend::new(17, "hey_fable").with_value_path(value.clone());
        let (tx, mut rx) = mpsc::channel(4);
        backend.start(tx).await.unwrap();

        // Simulate a press
        tokio::time::sleep(Duration::from_millis(120)).await;
        std::fs::write(&value, "1\n").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("button event within two seconds")
            .expect("channel open");
        assert_eq!(event.source, WakeSource::Button);
        assert!((event.confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(event.label, "hey_fable");

        backend.stop().await;
    }

    #[tokio::test]
    async fn test_held_button_fires_once() {
        let dir = tempfile::tempdir().unwrap();
        let value = dir.path().join("value");
        std::fs::write(&value, "1\n").unwrap();

        // Line already high at start: no rising edge, no event
        let mut backend = ButtonBackend::new(17, "hey_fable").with_value_path(value);
        let (tx, mut rx) = mpsc::channel(4);
        backend.start(tx).await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(result.is_err(), "held line must not fire");

        backend.stop().await;
    }
}
