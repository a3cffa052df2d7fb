//! Error types for entities, the orchestrator and the lifecycle path.

use dicesim_env::{EntityAddress, EnvError};
use thiserror::Error;

/// Errors raised by entity construction or stepping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    /// A die must have at least two sides
    #[error("A die needs at least 2 sides, got {0}")]
    InvalidSides(u32),
}

/// Errors surfaced by the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// The start/step trigger payload was absent
    #[error("Invalid trigger: invocation parameter required")]
    InvalidTrigger,

    /// `step` was called before `start`
    #[error("Simulation has not been started")]
    NotStarted,

    /// `start` was called while an auto-step loop is still driving rounds
    #[error("Simulation run {0} is still auto-stepping")]
    AlreadyRunning(String),

    /// Configuration rejected at construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The entity address could not be routed or lacks the operation
    #[error("Round {round}: routing failed for {address}: {source}")]
    Routing {
        round: u64,
        address: EntityAddress,
        #[source]
        source: EnvError,
    },

    /// The invocation transport or the remote entity failed
    #[error("Round {round}: invocation of {address} failed: {source}")]
    Transport {
        round: u64,
        address: EntityAddress,
        #[source]
        source: EnvError,
    },
}

impl OrchestratorError {
    /// Classifies an entity invocation failure for `round`.
    pub fn entity_failure(round: u64, address: EntityAddress, source: EnvError) -> Self {
        if source.is_routing() {
            Self::Routing {
                round,
                address,
                source,
            }
        } else {
            Self::Transport {
                round,
                address,
                source,
            }
        }
    }

    /// Returns the round an entity failure happened in.
    pub fn round(&self) -> Option<u64> {
        match self {
            Self::Routing { round, .. } | Self::Transport { round, .. } => Some(*round),
            _ => None,
        }
    }
}

/// Errors raised while handling lifecycle events.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Publishing the acknowledgement failed
    #[error("Failed to publish acknowledgement: {0}")]
    Publish(#[from] EnvError),

    /// The acknowledgement could not be encoded
    #[error("Failed to encode acknowledgement: {0}")]
    Encode(#[from] serde_json::Error),

    /// The diagnostic sample could not be drawn
    #[error("Diagnostic sample failed: {0}")]
    Sample(#[from] EntityError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_failure_classification() {
        let addr = EntityAddress::new("diceActorType", "die3");

        let err = OrchestratorError::entity_failure(4, addr.clone(), EnvError::unroutable(&addr));
        assert!(matches!(err, OrchestratorError::Routing { round: 4, .. }));

        let err = OrchestratorError::entity_failure(4, addr.clone(), EnvError::invocation("reset"));
        assert!(matches!(err, OrchestratorError::Transport { round: 4, .. }));
        assert_eq!(err.round(), Some(4));
        assert_eq!(OrchestratorError::NotStarted.round(), None);
    }

    #[test]
    fn test_error_messages_carry_context() {
        let addr = EntityAddress::new("coinActorType", "coin1");
        let err = OrchestratorError::entity_failure(2, addr, EnvError::invocation("eof"));
        let msg = err.to_string();
        assert!(msg.contains("Round 2"));
        assert!(msg.contains("coinActorType/coin1"));
    }
}
