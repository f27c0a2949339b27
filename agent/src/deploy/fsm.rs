//! Lifecycle state machine of one deployment

use crate::errors::AgentError;

/// Phase of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentPhase {
    /// Waiting for the descriptor
    Beginning,

    /// Artifacts are being fetched
    Downloading,

    /// Modules are being applied
    Updating,

    /// Finished, failed or stopped
    Terminal,
}

/// How a deployment ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentOutcome {
    Success,
    Failed,
    Stopped,
}

/// Phase event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Descriptor received, download phase starts
    Begin,

    /// All artifacts on disk
    DownloadFinished,

    /// Download or update failed
    Failed(String),

    /// Cancelled or superseded
    Stopped,

    /// All modules applied
    UpdateFinished,
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    phase: DeploymentPhase,
    outcome: Option<DeploymentOutcome>,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in the beginning phase
    pub fn new() -> Self {
        Self {
            phase: DeploymentPhase::Beginning,
            outcome: None,
            error: None,
        }
    }

    pub fn phase(&self) -> DeploymentPhase {
        self.phase
    }

    /// Set once the terminal phase is reached
    pub fn outcome(&self) -> Option<DeploymentOutcome> {
        self.outcome
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == DeploymentPhase::Terminal
    }

    /// Process an event and transition phase
    pub fn process(&mut self, event: PhaseEvent) -> Result<DeploymentPhase, AgentError> {
        let next = match (self.phase, &event) {
            (DeploymentPhase::Beginning, PhaseEvent::Begin) => DeploymentPhase::Downloading,

            (DeploymentPhase::Downloading, PhaseEvent::DownloadFinished) => DeploymentPhase::Updating,

            (DeploymentPhase::Updating, PhaseEvent::UpdateFinished) => {
                self.outcome = Some(DeploymentOutcome::Success);
                DeploymentPhase::Terminal
            }

            (
                DeploymentPhase::Downloading | DeploymentPhase::Updating,
                PhaseEvent::Failed(err),
            ) => {
                self.error = Some(err.clone());
                self.outcome = Some(DeploymentOutcome::Failed);
                DeploymentPhase::Terminal
            }

            // Updates are not stoppable once applying
            (
                DeploymentPhase::Beginning | DeploymentPhase::Downloading,
                PhaseEvent::Stopped,
            ) => {
                self.outcome = Some(DeploymentOutcome::Stopped);
                DeploymentPhase::Terminal
            }

            (phase, event) => {
                return Err(AgentError::InvalidTransition(format!(
                    "{:?} -> {:?}",
                    phase, event
                )));
            }
        };

        self.phase = next;
        Ok(next)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
