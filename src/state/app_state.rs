use log::{debug, warn};

use crate::error::{AgentError, Result};
use crate::state::SessionId;

/// Where the chat agent is in a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentPhase {
    #[default]
    Ready,
    Recording,
    WaitingForResponse,
    Playing,
    Error,
}

impl AgentPhase {
    fn can_become(self, next: AgentPhase) -> bool {
        use AgentPhase::*;
        matches!(
            (self, next),
            (_, Error)
                | (Ready, Recording)
                | (Recording, WaitingForResponse)
                | (Recording, Ready)
                | (WaitingForResponse, Playing)
                | (WaitingForResponse, Ready)
                | (Playing, Ready)
                | (Error, Ready)
        )
    }

    pub fn status_text(self) -> &'static str {
        match self {
            AgentPhase::Ready => "Ready to chat",
            AgentPhase::Recording => "Recording... press Enter to stop",
            AgentPhase::WaitingForResponse => "Thinking...",
            AgentPhase::Playing => "Playing response",
            AgentPhase::Error => "Error",
        }
    }
}

/// State of the chat agent for one session
#[derive(Debug, Clone)]
pub struct AgentState {
    phase: AgentPhase,
    pub session: SessionId,
    /// Completed request/reply turns
    pub turns: u32,
}

impl AgentState {
    pub fn new(session: SessionId) -> Self {
        Self {
            phase: AgentPhase::Ready,
            session,
            turns: 0,
        }
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    fn transition(&mut self, next: AgentPhase) -> Result<()> {
        if !self.phase.can_become(next) {
            return Err(AgentError::InvalidInput(format!(
                "Cannot go from {:?} to {:?}",
                self.phase, next
            )));
        }
        debug!("Agent phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Start a new recording
    pub fn start_recording(&mut self) -> Result<()> {
        self.transition(AgentPhase::Recording)
    }

    /// Recording stopped and the clip is being uploaded
    pub fn submit_recording(&mut self) -> Result<()> {
        self.transition(AgentPhase::WaitingForResponse)
    }

    /// Recording discarded without a network call
    pub fn cancel_recording(&mut self) -> Result<()> {
        self.transition(AgentPhase::Ready)
    }

    /// A reply arrived; `has_audio` selects between playing and ready
    pub fn response_received(&mut self, has_audio: bool) -> Result<()> {
        self.turns += 1;
        self.transition(if has_audio {
            AgentPhase::Playing
        } else {
            AgentPhase::Ready
        })
    }

    pub fn playback_finished(&mut self) -> Result<()> {
        self.transition(AgentPhase::Ready)
    }

    pub fn fail(&mut self, error: &AgentError) {
        warn!("Turn failed in {:?}: {}", self.phase, error);
        self.phase = AgentPhase::Error;
    }

    /// Leave the error state so the next turn can start
    pub fn recover(&mut self) -> Result<()> {
        self.transition(AgentPhase::Ready)
    }

    /// Auto-record may only begin when nothing is recording or in flight
    pub fn can_auto_record(&self) -> bool {
        self.phase == AgentPhase::Ready
    }
}
