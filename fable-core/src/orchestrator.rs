//! The interaction orchestrator.
//!
//! Owns the Idle -> Listening -> Processing -> Speaking cycle: consumes
//! wake events, drives capture, transcription, generation, synthesis,
//! and playback for one session at a time, and recovers to Idle through
//! the fallback path on any stage failure. Wake events that arrive while
//! a session is running are dropped, not queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::{AudioDevice, Utterance};
use crate::config::FableConfig;
use crate::error::{LlmError, SessionError, SttError, TtsError};
use crate::feedback;
use crate::services::{
    ConversationHistory, LlmProvider, ResponseProfile, SttProvider, ToneTtsProvider, TtsProvider,
};
use crate::session::{InteractionSession, InteractionState};
use crate::wake::{WakeEvent, WakeSource};

/// Observable pipeline events, published alongside the state channel.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    SessionStarted { id: Uuid, source: WakeSource },
    TranscriptReady { id: Uuid, text: String },
    ResponseReady { id: Uuid, text: String },
    SessionCompleted { id: Uuid, elapsed: Duration },
    SessionFailed { id: Uuid, stage: String, reason: String },
    WakeIgnored { reason: String },
}

/// A stage error plus where it happened, carried to the fallback path.
struct StageFailure {
    stage: &'static str,
    reason: String,
}

pub struct Orchestrator {
    config: FableConfig,
    device: Arc<dyn AudioDevice>,
    stt: Arc<dyn SttProvider>,
    llm: Arc<dyn LlmProvider>,
    tts: Arc<dyn TtsProvider>,
    fallback_tts: ToneTtsProvider,
    history: ConversationHistory,
    profile: ResponseProfile,
    apology: Utterance,
    state_tx: watch::Sender<InteractionState>,
    events_tx: broadcast::Sender<OrchestratorEvent>,
    cleanup_tx: mpsc::Sender<()>,
    cleanup_rx: mpsc::Receiver<()>,
}

impl Orchestrator {
    pub fn new(
        config: FableConfig,
        device: Arc<dyn AudioDevice>,
        stt: Arc<dyn SttProvider>,
        llm: Arc<dyn LlmProvider>,
        tts: Arc<dyn TtsProvider>,
    ) -> Self {
        let profile = ResponseProfile {
            listener_age: config.llm.listener_age,
            max_words: config.llm.max_response_words,
            persona: "Fable".to_string(),
        };
        let history = ConversationHistory::new(config.llm.history_limit);
        let apology = feedback::apology_clip(config.tts.apology_clip.as_deref());
        let (state_tx, _) = watch::channel(InteractionState::Idle);
        let (events_tx, _) = broadcast::channel(64);
        let (cleanup_tx, cleanup_rx) = mpsc::channel(4);
        Self {
            config,
            device,
            stt,
            llm,
            tts,
            fallback_tts: ToneTtsProvider::default(),
            history,
            profile,
            apology,
            state_tx,
            events_tx,
            cleanup_tx,
            cleanup_rx,
        }
    }

    /// Subscribe to state changes. Receivers see the current state
    /// immediately.
    pub fn state(&self) -> watch::Receiver<InteractionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to pipeline events.
    pub fn events(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events_tx.subscribe()
    }

    /// Drop all remembered conversation turns.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Handle for the resource monitor's cleanup hook. A send here makes
    /// the run loop drop conversation history between sessions.
    pub fn cleanup_handle(&self) -> mpsc::Sender<()> {
        self.cleanup_tx.clone()
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events_tx.send(event);
    }

    fn publish_state(&self, state: InteractionState) {
        let _ = self.state_tx.send(state);
    }

    /// Main loop: wait for wake events until cancelled. One session at a
    /// time; events buffered while a session ran are drained and dropped
    /// before the next wait.
    pub async fn run(
        &mut self,
        mut wake_rx: mpsc::Receiver<WakeEvent>,
        cancel: CancellationToken,
    ) {
        info!("orchestrator started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("orchestrator stopping");
                    self.publish_state(InteractionState::Idle);
                    return;
                }
                event = wake_rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        warn!("wake event channel closed, orchestrator stopping");
                        return;
                    }
                },
                Some(()) = self.cleanup_rx.recv() => {
                    info!("cleanup requested, dropping conversation history");
                    self.history.clear();
                    continue;
                }
            };

            let bypass = self.config.test_channel.bypass_threshold;
            if !event.passes_threshold(self.config.wake.threshold, bypass) {
                debug!(
                    confidence = event.confidence,
                    threshold = self.config.wake.threshold,
                    "wake event below threshold, ignored"
                );
                self.emit(OrchestratorEvent::WakeIgnored {
                    reason: format!("confidence {} below threshold", event.confidence),
                });
                continue;
            }

            self.handle_session(event, &cancel).await;
            if cancel.is_cancelled() {
                info!("orchestrator stopping");
                self.publish_state(InteractionState::Idle);
                return;
            }

            // drop anything that arrived while the session ran
            while let Ok(stale) = wake_rx.try_recv() {
                debug!(source = ?stale.source, "wake event during active session, ignored");
                self.emit(OrchestratorEvent::WakeIgnored {
                    reason: SessionError::AlreadyActive.to_string(),
                });
            }
        }
    }

    /// Run one session. Cancellation does not cut the pipeline off
    /// immediately: the session gets the configured shutdown grace to
    /// finish on its own, and only then is aborted through the fallback
    /// path so the device is released like any other failure.
    async fn handle_session(&mut self, event: WakeEvent, cancel: &CancellationToken) {
        let budget = self.config.session.target_response_time();
        let grace = self.config.session.shutdown_grace();
        let mut session = InteractionSession::begin(event, budget);
        info!(
            session = %session.id,
            source = ?session.wake.source,
            confidence = session.wake.confidence,
            "session started"
        );
        self.emit(OrchestratorEvent::SessionStarted {
            id: session.id,
            source: session.wake.source,
        });

        let outcome = {
            let pipeline = self.run_pipeline(&mut session);
            tokio::pin!(pipeline);
            tokio::select! {
                result = &mut pipeline => Some(result),
                _ = async {
                    cancel.cancelled().await;
                    tokio::time::sleep(grace).await;
                } => None,
            }
        };

        match outcome {
            Some(Ok(())) => {
                let elapsed = session.clock.elapsed();
                info!(session = %session.id, elapsed_ms = elapsed.as_millis() as u64, "session completed");
                self.emit(OrchestratorEvent::SessionCompleted {
                    id: session.id,
                    elapsed,
                });
                if let (Some(transcript), Some(response)) =
                    (session.transcript.as_ref(), session.response_text.as_ref())
                {
                    self.history.push(transcript.clone(), response.clone());
                }
                self.finish(&mut session, InteractionState::Idle);
            }
            Some(Err(StageFailure { stage, reason })) => {
                error!(session = %session.id, stage, reason, "session failed");
                self.emit(OrchestratorEvent::SessionFailed {
                    id: session.id,
                    stage: stage.to_string(),
                    reason,
                });
                self.recover(&mut session).await;
            }
            None => {
                warn!(
                    session = %session.id,
                    grace_ms = grace.as_millis() as u64,
                    "shutdown grace expired, aborting session"
                );
                self.emit(OrchestratorEvent::SessionFailed {
                    id: session.id,
                    stage: "shutdown".to_string(),
                    reason: "cancelled before completion".to_string(),
                });
                self.recover(&mut session).await;
            }
        }
    }

    /// The happy path. Any stage error returns early and the caller runs
    /// the fallback.
    async fn run_pipeline(
        &mut self,
        session: &mut InteractionSession,
    ) -> Result<(), StageFailure> {
        self.advance(session, InteractionState::Listening)?;
        self.play_cue(&feedback::wake_chime()).await;

        let utterance = self.capture(session).await?;
        self.play_cue(&feedback::listening_done_cue()).await;

        self.advance(session, InteractionState::Processing)?;
        let transcript = self.transcribe(session, &utterance).await?;
        drop(utterance);
        self.emit(OrchestratorEvent::TranscriptReady {
            id: session.id,
            text: transcript.clone(),
        });
        session.transcript = Some(transcript.clone());

        let response = self.generate(session, &transcript).await?;
        self.emit(OrchestratorEvent::ResponseReady {
            id: session.id,
            text: response.clone(),
        });
        session.response_text = Some(response.clone());

        let audio = self.synthesize(session, &response).await?;
        session.response_audio = Some(audio);

        self.advance(session, InteractionState::Speaking)?;
        let audio = session.response_audio.as_ref().unwrap_or(&self.apology);
        self.device.play(audio).await.map_err(|e| {
            StageFailure {
                stage: "playback",
                reason: e.to_string(),
            }
        })?;

        Ok(())
    }

    async fn capture(
        &self,
        session: &mut InteractionSession,
    ) -> Result<Utterance, StageFailure> {
        // half a second over the recording window for the device to wind down
        let record_window =
            Duration::from_secs_f32(self.config.audio.max_record_secs) + Duration::from_millis(500);
        let budget = self.stage_budget(session, "capture", record_window)?;
        let max_secs = self
            .config
            .audio
            .max_record_secs
            .min(budget.as_secs_f32());
        match timeout(budget, self.device.record(max_secs)).await {
            Ok(Ok(utterance)) if !utterance.is_empty() => Ok(utterance),
            Ok(Ok(_)) => Err(StageFailure {
                stage: "capture",
                reason: "no audio captured".into(),
            }),
            Ok(Err(e)) => Err(StageFailure {
                stage: "capture",
                reason: e.to_string(),
            }),
            Err(_) => Err(StageFailure {
                stage: "capture",
                reason: "capture exceeded session budget".into(),
            }),
        }
    }

    /// Transcribe with one retry on a transient network failure, budget
    /// permitting.
    async fn transcribe(
        &self,
        session: &mut InteractionSession,
        utterance: &Utterance,
    ) -> Result<String, StageFailure> {
        let language = self.config.stt.language.clone();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let budget = self.stage_budget(session, "stt", self.config.stt.timeout())?;
            let result = match timeout(
                budget,
                self.stt.transcribe(utterance, &language, budget),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SttError::Timeout {
                    timeout: budget,
                }),
            };

            match result {
                Ok(transcript) if transcript.text.trim().is_empty() => {
                    return Err(StageFailure {
                        stage: "stt",
                        reason: "empty transcript".into(),
                    });
                }
                Ok(transcript) => return Ok(transcript.text),
                Err(SttError::TransientNetwork { message }) if attempts < 2 => {
                    warn!(error = %message, "transient transcription failure, retrying");
                    continue;
                }
                Err(e) => {
                    return Err(StageFailure {
                        stage: "stt",
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Generate a response. Never retried: a second generation would
    /// blow the budget and quota errors do not recover in-session.
    async fn generate(
        &self,
        session: &mut InteractionSession,
        transcript: &str,
    ) -> Result<String, StageFailure> {
        let budget = self.stage_budget(session, "llm", self.config.llm.timeout())?;
        let result = match timeout(
            budget,
            self.llm
                .generate(transcript, &self.history, &self.profile, budget),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout { timeout: budget }),
        };
        result.map_err(|e| StageFailure {
            stage: "llm",
            reason: e.to_string(),
        })
    }

    /// Synthesize the response, falling back to offline tone rendering
    /// when the primary synthesizer fails.
    async fn synthesize(
        &self,
        session: &mut InteractionSession,
        text: &str,
    ) -> Result<Utterance, StageFailure> {
        let budget = self.stage_budget(session, "tts", self.config.tts.timeout())?;
        let voice = &self.config.tts.voice;
        let result = match timeout(budget, self.tts.synthesize(text, voice, budget)).await {
            Ok(result) => result,
            Err(_) => Err(TtsError::Timeout { timeout: budget }),
        };

        match result {
            Ok(audio) => Ok(audio),
            Err(e) => {
                warn!(error = %e, "synthesis failed, using offline fallback");
                self.fallback_tts
                    .synthesize(text, voice, Duration::from_secs(1))
                    .await
                    .map_err(|fallback_err| StageFailure {
                        stage: "tts",
                        reason: format!("{e}; fallback also failed: {fallback_err}"),
                    })
            }
        }
    }

    /// Fallback path: error tone plus the apology clip, then back to
    /// Idle. Playback failures here are logged and swallowed.
    async fn recover(&mut self, session: &mut InteractionSession) {
        if session.transition(InteractionState::Error).is_err() {
            session.force_error();
        }
        self.publish_state(InteractionState::Error);

        self.play_cue(&feedback::error_tone()).await;
        self.play_cue(&self.apology).await;

        self.finish(session, InteractionState::Idle);
    }

    fn finish(&mut self, session: &mut InteractionSession, state: InteractionState) {
        if let Err(e) = session.transition(state) {
            error!(session = %session.id, error = %e, "transition rejected, forcing recovery");
            session.force_error();
            let _ = session.transition(InteractionState::Idle);
        }
        self.publish_state(InteractionState::Idle);
    }

    fn advance(
        &self,
        session: &mut InteractionSession,
        state: InteractionState,
    ) -> Result<(), StageFailure> {
        session
            .transition(state)
            .map_err(|e| StageFailure {
                stage: "transition",
                reason: e.to_string(),
            })?;
        self.publish_state(state);
        Ok(())
    }

    /// Time a stage may take: its own configured timeout, clipped to
    /// whatever remains of the session budget.
    fn stage_budget(
        &self,
        session: &InteractionSession,
        stage: &'static str,
        stage_timeout: Duration,
    ) -> Result<Duration, StageFailure> {
        if session.clock.expired() {
            let err = SessionError::BudgetExceeded {
                stage: stage.to_string(),
            };
            return Err(StageFailure {
                stage,
                reason: err.to_string(),
            });
        }
        Ok(session.clock.stage_budget(stage_timeout))
    }

    async fn play_cue(&self, cue: &Utterance) {
        if let Err(e) = self.device.play(cue).await {
            warn!(error = %e, "feedback cue playback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MockAudioDevice;
    use crate::config::FableConfig;
    use crate::error::TtsError;
    use crate::services::{MockLlmProvider, MockSttProvider, MockTtsProvider, Transcript};

    fn speech() -> Utterance {
        Utterance::new(vec![0.1; 16_000], 16_000, 1)
    }

    fn transcript(text: &str) -> Transcript {
        Transcript {
            text: text.to_string(),
            confidence: 0.95,
            language: Some("en-US".to_string()),
        }
    }

    struct Rig {
        orchestrator: Orchestrator,
        device: Arc<MockAudioDevice>,
        stt: Arc<MockSttProvider>,
        llm: Arc<MockLlmProvider>,
        tts: Arc<MockTtsProvider>,
    }

    fn rig(
        stt: MockSttProvider,
        llm: MockLlmProvider,
        tts: MockTtsProvider,
    ) -> Rig {
        let device = Arc::new(MockAudioDevice::with_recordings(vec![speech(), speech()]));
        let stt = Arc::new(stt);
        let llm = Arc::new(llm);
        let tts = Arc::new(tts);
        let orchestrator = Orchestrator::new(
            FableConfig::default(),
            Arc::clone(&device) as Arc<dyn AudioDevice>,
            Arc::clone(&stt) as Arc<dyn SttProvider>,
            Arc::clone(&llm) as Arc<dyn LlmProvider>,
            Arc::clone(&tts) as Arc<dyn TtsProvider>,
        );
        Rig {
            orchestrator,
            device,
            stt,
            llm,
            tts,
        }
    }

    fn wake(confidence: f32) -> WakeEvent {
        WakeEvent::new("hey_fable", confidence, WakeSource::Neural)
    }

    #[tokio::test]
    async fn test_full_session_happy_path() {
        let mut rig = rig(
            MockSttProvider::with_responses(vec![Ok(transcript("tell me a story"))]),
            MockLlmProvider::with_responses(vec![Ok("once upon a time".into())]),
            MockTtsProvider::new(),
        );

        rig.orchestrator
            .handle_session(wake(0.9), &CancellationToken::new())
            .await;

        assert_eq!(rig.stt.call_count(), 1);
        assert_eq!(rig.llm.call_count(), 1);
        assert_eq!(rig.tts.requests(), vec!["once upon a time".to_string()]);
        // wake chime + done cue + response
        assert_eq!(rig.device.play_count(), 3);
        assert_eq!(*rig.orchestrator.state().borrow(), InteractionState::Idle);
        assert_eq!(rig.orchestrator.history.len(), 1);
    }

    #[tokio::test]
    async fn test_stt_transient_failure_retried_once() {
        let mut rig = rig(
            MockSttProvider::with_responses(vec![
                Err(SttError::TransientNetwork {
                    message: "reset".into(),
                }),
                Ok(transcript("hello")),
            ]),
            MockLlmProvider::with_responses(vec![Ok("hi there".into())]),
            MockTtsProvider::new(),
        );

        rig.orchestrator
            .handle_session(wake(0.9), &CancellationToken::new())
            .await;

        assert_eq!(rig.stt.call_count(), 2);
        assert_eq!(rig.llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stt_failure_runs_fallback_and_recovers() {
        let mut rig = rig(
            MockSttProvider::with_responses(vec![
                Err(SttError::Unsupported {
                    detail: "bad audio".into(),
                }),
            ]),
            MockLlmProvider::new(),
            MockTtsProvider::new(),
        );
        let mut events = rig.orchestrator.events();

        rig.orchestrator
            .handle_session(wake(0.9), &CancellationToken::new())
            .await;

        assert_eq!(rig.llm.call_count(), 0);
        // wake chime + done cue + error tone + apology
        assert_eq!(rig.device.play_count(), 4);
        assert_eq!(*rig.orchestrator.state().borrow(), InteractionState::Idle);
        assert!(rig.orchestrator.history.is_empty());

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let OrchestratorEvent::SessionFailed { stage, .. } = event {
                assert_eq!(stage, "stt");
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_tts_failure_uses_offline_fallback() {
        let mut rig = rig(
            MockSttProvider::with_responses(vec![Ok(transcript("hello"))]),
            MockLlmProvider::with_responses(vec![Ok("hi there".into())]),
            MockTtsProvider::with_responses(vec![Err(TtsError::RequestFailed {
                message: "server down".into(),
            })]),
        );

        rig.orchestrator
            .handle_session(wake(0.9), &CancellationToken::new())
            .await;

        // tone fallback still reaches playback
        assert_eq!(rig.device.play_count(), 3);
        assert_eq!(*rig.orchestrator.state().borrow(), InteractionState::Idle);
        // history records the exchange even with degraded audio
        assert_eq!(rig.orchestrator.history.len(), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_wake_ignored() {
        let mut rig = rig(
            MockSttProvider::new(),
            MockLlmProvider::new(),
            MockTtsProvider::new(),
        );
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        tx.send(wake(0.3)).await.unwrap();
        drop(tx);
        rig.orchestrator.run(rx, cancel).await;

        assert_eq!(rig.stt.call_count(), 0);
        assert_eq!(rig.device.play_count(), 0);
    }

    #[tokio::test]
    async fn test_threshold_boundary_accepted() {
        let mut rig = rig(
            MockSttProvider::with_responses(vec![Ok(transcript("hi"))]),
            MockLlmProvider::with_responses(vec![Ok("hello".into())]),
            MockTtsProvider::new(),
        );
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        // exactly at the 0.5 default threshold
        tx.send(wake(0.5)).await.unwrap();
        drop(tx);
        rig.orchestrator.run(rx, cancel).await;

        assert_eq!(rig.stt.call_count(), 1);
    }

    #[tokio::test]
    async fn test_events_buffered_during_session_are_dropped() {
        let mut rig = rig(
            MockSttProvider::with_responses(vec![Ok(transcript("hi"))]),
            MockLlmProvider::with_responses(vec![Ok("hello".into())]),
            MockTtsProvider::new(),
        );
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        // both queued before the loop runs; the second lands while the
        // first session is active and must not start a second session
        tx.send(wake(0.9)).await.unwrap();
        tx.send(wake(0.9)).await.unwrap();
        drop(tx);
        rig.orchestrator.run(rx, cancel).await;

        assert_eq!(rig.stt.call_count(), 1);
        assert_eq!(rig.llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_loop() {
        let mut rig = rig(
            MockSttProvider::new(),
            MockLlmProvider::new(),
            MockTtsProvider::new(),
        );
        let (_tx, rx) = mpsc::channel::<WakeEvent>(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        rig.orchestrator.run(rx, cancel).await;
        assert_eq!(*rig.orchestrator.state().borrow(), InteractionState::Idle);
    }

    #[tokio::test]
    async fn test_clear_history() {
        let mut rig = rig(
            MockSttProvider::with_responses(vec![Ok(transcript("hi"))]),
            MockLlmProvider::with_responses(vec![Ok("hello".into())]),
            MockTtsProvider::new(),
        );
        rig.orchestrator
            .handle_session(wake(0.9), &CancellationToken::new())
            .await;
        assert_eq!(rig.orchestrator.history.len(), 1);

        rig.orchestrator.clear_history();
        assert!(rig.orchestrator.history.is_empty());
    }
}
