//! Error types for the dicesim environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// No host can service this entity type
    #[error("Address not routable: {0}")]
    AddressNotRoutable(String),

    /// Transport or remote failure; the outcome of the call is unknown
    #[error("Invocation failed: {0}")]
    InvocationFailed(String),

    /// The entity type does not implement the requested operation
    #[error("Operation '{operation}' not supported by entity type '{entity_type}'")]
    OperationNotSupported {
        entity_type: String,
        operation: String,
    },

    /// Payload serialization/deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Publishing onto the event bus failed
    #[error("Publish to topic '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates an invocation failure.
    pub fn invocation(msg: impl Into<String>) -> Self {
        Self::InvocationFailed(msg.into())
    }

    /// Creates an unroutable error.
    pub fn unroutable(address: impl std::fmt::Display) -> Self {
        Self::AddressNotRoutable(address.to_string())
    }

    /// Creates an unsupported-operation error.
    pub fn unsupported(entity_type: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::OperationNotSupported {
            entity_type: entity_type.into(),
            operation: operation.into(),
        }
    }

    /// Creates a publish failure.
    pub fn publish(topic: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::PublishFailed {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for routing-class errors (never retried).
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            Self::AddressNotRoutable(_) | Self::OperationNotSupported { .. }
        )
    }

    /// Returns true for transient transport failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InvocationFailed(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for EnvError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(EnvError::unroutable("diceActorType/die0").is_routing());
        assert!(EnvError::unsupported("coinActorType", "roll").is_routing());
        assert!(!EnvError::invocation("reset").is_routing());

        assert!(EnvError::invocation("connection reset").is_retryable());
        assert!(EnvError::Timeout(500).is_retryable());
        assert!(!EnvError::unroutable("x/y").is_retryable());
        assert!(!EnvError::SerializationError("bad".into()).is_retryable());
    }
}
