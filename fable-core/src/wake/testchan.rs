//! Test injection backend: wake events over a local Unix socket.
//!
//! Accepts newline-delimited commands of the form `WAKE <confidence> <label>`
//! on an owner-only (mode 0600) Unix domain socket. This replaces the
//! world-writable named pipe the hardware rigs used to carry: only the
//! device user can inject events, and the socket exists at all only when
//! `test_channel.enabled` is set, which it never is in a shipped config.

use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{WakeBackend, WakeEvent, WakeSource};
use crate::error::WakeError;

pub struct TestInjectionBackend {
    socket_path: PathBuf,
    cancel: Option<CancellationToken>,
}

impl TestInjectionBackend {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            cancel: None,
        }
    }

    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }
}

/// Parse one `WAKE <confidence> <label>` line.
pub fn parse_command(line: &str) -> Result<WakeEvent, WakeError> {
    let mut parts = line.split_whitespace();
    let malformed = || WakeError::MalformedCommand { line: line.into() };

    match parts.next() {
        Some("WAKE") => {}
        _ => return Err(malformed()),
    }
    let confidence: f32 = parts
        .next()
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(malformed)?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(malformed());
    }
    let label = parts.next().ok_or_else(malformed)?;
    if parts.next().is_some() {
        return Err(malformed());
    }
    Ok(WakeEvent::new(label, confidence, WakeSource::TestInjection))
}

#[async_trait]
impl WakeBackend for TestInjectionBackend {
    async fn start(&mut self, events: mpsc::Sender<WakeEvent>) -> Result<(), WakeError> {
        if self.cancel.is_some() {
            return Err(WakeError::AlreadyRunning {
                backend: "test-injection".into(),
            });
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WakeError::BackendUnavailable {
                backend: "test-injection".into(),
                reason: format!("cannot create socket directory: {e}"),
            })?;
        }
        // Stale socket from a previous run
        let _ = std::fs::remove_file(&self.socket_path);

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| WakeError::BackendUnavailable {
                backend: "test-injection".into(),
                reason: format!("cannot bind {}: {e}", self.socket_path.display()),
            })?;
        // Owner-only: never world-writable
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| WakeError::BackendUnavailable {
                backend: "test-injection".into(),
                reason: format!("cannot restrict socket permissions: {e}"),
            })?;

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let socket_path = self.socket_path.clone();

        tokio::spawn(async move {
            tracing::info!(path = %socket_path.display(), "test injection channel listening");
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        let (stream, _) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                tracing::warn!(error = %e, "injection accept failed");
                                continue;
                            }
                        };
                        let events = events.clone();
                        let conn_cancel = task_cancel.clone();
                        tokio::spawn(async move {
                            let mut lines = BufReader::new(stream).lines();
                            loop {
                                tokio::select! {
                                    _ = conn_cancel.cancelled() => break,
                                    line = lines.next_line() => {
                                        let line = match line {
                                            Ok(Some(l)) => l,
                                            _ => break,
                                        };
                                        match parse_command(&line) {
                                            Ok(event) => {
                                                tracing::debug!(
                                                    label = %event.label,
                                                    confidence = event.confidence,
                                                    "wake event injected"
                                                );
                                                if events.send(event).await.is_err() {
                                                    break;
                                                }
                                            }
                                            Err(e) => {
                                                tracing::warn!(error = %e, "ignoring injection command");
                                            }
                                        }
                                    }
                                }
                            }
                        });
                    }
                }
            }
            let _ = std::fs::remove_file(&socket_path);
            tracing::info!("test injection channel closed");
        });

        self.cancel = Some(cancel);
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }

    fn source(&self) -> WakeSource {
        WakeSource::TestInjection
    }

    fn name(&self) -> &str {
        "test-injection"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;

    #[test]
    fn test_parse_valid_command() {
        let event = parse_command("WAKE 0.9 hey_fable").unwrap();
        assert!((event.confidence - 0.9).abs() < f32::EPSILON);
        assert_eq!(event.label, "hey_fable");
        assert_eq!(event.source, WakeSource::TestInjection);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_command("").is_err());
        assert!(parse_command("SLEEP 0.9 hey_fable").is_err());
        assert!(parse_command("WAKE hey_fable 0.9").is_err());
        assert!(parse_command("WAKE 0.9").is_err());
        assert!(parse_command("WAKE 1.5 hey_fable").is_err());
        assert!(parse_command("WAKE -0.1 hey_fable").is_err());
        assert!(parse_command("WAKE 0.9 hey_fable extra").is_err());
    }

    #[tokio::test]
    async fn test_socket_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inject.sock");

        let mut backend = TestInjectionBackend::new(path.clone());
        let (tx, mut rx) = mpsc::channel(8);
        backend.start(tx).await.unwrap();

        // Socket must be owner-only
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream.write_all(b"WAKE 0.9 hey_fable\n").await.unwrap();
        stream.write_all(b"garbage line\n").await.unwrap();
        stream.write_all(b"WAKE 0.3 hey_fable\n").await.unwrap();
        stream.flush().await.unwrap();

        let first = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!((first.confidence - 0.9).abs() < f32::EPSILON);

        // The malformed line is dropped; the next event is the 0.3 one
        let second = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!((second.confidence - 0.3).abs() < f32::EPSILON);

        backend.stop().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stop_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inject.sock");

        let mut backend = TestInjectionBackend::new(path.clone());
        let (tx, _rx) = mpsc::channel(8);
        backend.start(tx).await.unwrap();
        assert!(path.exists());

        backend.stop().await;
        assert!(!path.exists());
    }
}
