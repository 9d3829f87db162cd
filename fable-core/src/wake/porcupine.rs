//! Porcupine wake-word backend (commercial engine).
//!
//! Requires an access key and a keyword file. The engine itself links only
//! on device images carrying the vendor SDK; elsewhere `start()` reports
//! `BackendUnavailable` after validating the configuration, and the caller
//! falls through to any other enabled backend.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;

use super::{WakeBackend, WakeEvent, WakeSource};
use crate::error::WakeError;

pub struct PorcupineBackend {
    keyword_path: PathBuf,
    access_key: Option<String>,
    label: String,
}

impl PorcupineBackend {
    pub fn new(
        keyword_path: PathBuf,
        access_key: Option<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            keyword_path,
            access_key,
            label: label.into(),
        }
    }

    fn check_assets(&self) -> Result<(), WakeError> {
        if !self.keyword_path.exists() {
            return Err(WakeError::BackendUnavailable {
                backend: "porcupine".into(),
                reason: format!("keyword file not found: {}", self.keyword_path.display()),
            });
        }
        match &self.access_key {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(WakeError::BackendUnavailable {
                backend: "porcupine".into(),
                reason: "access key not set".into(),
            }),
        }
    }

    /// Keyword label reported on detection. Porcupine classifies a single
    /// keyword per file, so every hit carries full confidence.
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[async_trait]
impl WakeBackend for PorcupineBackend {
    async fn start(&mut self, _events: mpsc::Sender<WakeEvent>) -> Result<(), WakeError> {
        self.check_assets()?;
        // The vendor SDK is not linked into this build. Detection hits, when
        // the engine runs, are emitted as WakeEvent::new(label, 1.0, Porcupine).
        Err(WakeError::BackendUnavailable {
            backend: "porcupine".into(),
            reason: "porcupine SDK not linked in this build".into(),
        })
    }

    async fn stop(&mut self) {}

    fn source(&self) -> WakeSource {
        WakeSource::Porcupine
    }

    fn name(&self) -> &str {
        "porcupine"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_keyword_file() {
        let mut backend = PorcupineBackend::new(
            PathBuf::from("/nonexistent/hey_fable.ppn"),
            Some("key".into()),
            "hey_fable",
        );
        let (tx, _rx) = mpsc::channel(4);
        let err = backend.start(tx).await.unwrap_err();
        assert!(err.to_string().contains("keyword file not found"));
    }

    #[tokio::test]
    async fn test_missing_access_key() {
        let dir = tempfile::tempdir().unwrap();
        let keyword = dir.path().join("hey_fable.ppn");
        std::fs::write(&keyword, b"stub").unwrap();

        let mut backend = PorcupineBackend::new(keyword.clone(), None, "hey_fable");
        let (tx, _rx) = mpsc::channel(4);
        let err = backend.start(tx).await.unwrap_err();
        assert!(err.to_string().contains("access key not set"));

        let mut backend = PorcupineBackend::new(keyword, Some("  ".into()), "hey_fable");
        let (tx, _rx) = mpsc::channel(4);
        assert!(backend.start(tx).await.is_err());
    }
}
