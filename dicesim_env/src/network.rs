//! Invocation and pub/sub abstractions between dicesim services.

use crate::error::EnvError;
use crate::types::EntityAddress;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Location-transparent request/response channel to entities.
///
/// # Implementations
///
/// - **In-process**: `LocalRouter` (dicesim_core) - calls directories directly
/// - **Simulation**: `SimTransport` (dicesim_sim) - router plus fault injection
/// - **Production**: `SidecarClient` (dicesim_service) - HTTP to the sidecar
///
/// # Call Flow
///
/// ```text
/// Orchestrator                Transport                 Entity Directory
///   |                            |                             |
///   |-- invoke(addr, "step") --->|                             |
///   |                            |-- route by entity type ---->|
///   |                            |                             |-- activate if needed
///   |<----------- bytes ---------|<------------ bytes ---------|
/// ```
#[async_trait]
pub trait InvocationTransport: Send + Sync + 'static {
    /// Invokes `operation` on the entity at `address`.
    ///
    /// # Returns
    /// * `Ok(bytes)` - The encoded operation result
    /// * `Err(EnvError::AddressNotRoutable)` - No host serves the entity type
    /// * `Err(EnvError::OperationNotSupported)` - Entity lacks the operation
    /// * `Err(EnvError::InvocationFailed)` - Transport/remote failure, outcome unknown
    async fn invoke(
        &self,
        address: &EntityAddress,
        operation: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, EnvError>;
}

/// Topic-based publish side of the event channel.
///
/// Publishing is fire-and-forget: success means the message was accepted,
/// not that any subscriber handled it.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    /// Publishes raw bytes on a topic.
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), EnvError>;
}

/// How a subscriber disposed of a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TopicResponse {
    /// Handled; do not redeliver
    Success,
    /// Ask the bus to redeliver
    Retry,
    /// Dropped (malformed or failed); do not redeliver
    Drop,
}

/// Subscriber side of the event channel.
#[async_trait]
pub trait TopicHandler: Send + Sync + 'static {
    /// Handles one message delivered on `topic`.
    async fn on_event(&self, topic: &str, data: &[u8]) -> TopicResponse;
}
