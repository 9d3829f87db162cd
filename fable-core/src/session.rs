//! Interaction session state and deadline accounting.
//!
//! A session covers one full exchange: wake, capture, transcription,
//! generation, synthesis, playback. At most one session exists at a time;
//! its deadline is fixed at wake time and every downstream stage draws
//! from whatever budget remains.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::audio::Utterance;
use crate::error::SessionError;
use crate::wake::WakeEvent;

/// The orchestrator's externally observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionState {
    /// Waiting for a wake event.
    Idle,
    /// Recording the listener's utterance.
    Listening,
    /// Transcription and response generation in flight.
    Processing,
    /// Playing the synthesized response.
    Speaking,
    /// A stage failed; the fallback path is running.
    Error,
}

impl InteractionState {
    /// Whether moving to `next` is a permitted transition.
    ///
    /// Any state may move to `Error`, and `Error` recovers only to
    /// `Idle`. The happy path is a strict cycle through the pipeline.
    pub fn can_transition_to(self, next: InteractionState) -> bool {
        use InteractionState::*;
        match (self, next) {
            (_, Error) => true,
            (Error, Idle) => true,
            (Idle, Listening) => true,
            (Listening, Processing) => true,
            (Processing, Speaking) => true,
            (Speaking, Idle) => true,
            // aborting back to Idle from mid-pipeline is allowed (shutdown)
            (Listening, Idle) | (Processing, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for InteractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InteractionState::Idle => "Idle",
            InteractionState::Listening => "Listening",
            InteractionState::Processing => "Processing",
            InteractionState::Speaking => "Speaking",
            InteractionState::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Tracks the remaining time budget for a session.
#[derive(Debug, Clone)]
pub struct SessionClock {
    started: Instant,
    budget: Duration,
}

impl SessionClock {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Budget still unspent, zero once the deadline has passed.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Budget for one stage: the stage's own timeout, clipped to the
    /// session's remaining time.
    pub fn stage_budget(&self, stage_timeout: Duration) -> Duration {
        stage_timeout.min(self.remaining())
    }
}

/// One in-flight interaction from wake to playback.
#[derive(Debug)]
pub struct InteractionSession {
    pub id: Uuid,
    pub wake: WakeEvent,
    pub started_at: DateTime<Utc>,
    pub clock: SessionClock,
    state: InteractionState,
    pub transcript: Option<String>,
    pub response_text: Option<String>,
    pub response_audio: Option<Utterance>,
}

impl InteractionSession {
    pub fn begin(wake: WakeEvent, budget: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            wake,
            started_at: Utc::now(),
            clock: SessionClock::start(budget),
            state: InteractionState::Idle,
            transcript: None,
            response_text: None,
            response_audio: None,
        }
    }

    pub fn state(&self) -> InteractionState {
        self.state
    }

    /// Move to `next`, rejecting transitions the table does not permit.
    pub fn transition(&mut self, next: InteractionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(session = %self.id, from = %self.state, to = %next, "state transition");
        self.state = next;
        Ok(())
    }

    /// Force the state to `Error` regardless of the table. Used when a
    /// rejected transition itself signals a defect.
    pub fn force_error(&mut self) {
        self.state = InteractionState::Error;
    }
}
