//! Common types for the dicesim environment abstraction.

use serde::{Deserialize, Serialize};

/// Pub/sub component the lifecycle choreography runs on.
pub const LIFECYCLE_PUBSUB: &str = "simulation";

/// Topic carrying lifecycle events and their acknowledgements.
pub const LIFECYCLE_TOPIC: &str = "core";

/// Route lifecycle events are delivered to on each hosting service.
pub const LIFECYCLE_ROUTE: &str = "/endpoint";

/// Logical address of one simulated entity.
///
/// The id is only unique within its entity type. Addresses order by type
/// first and id second.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityAddress {
    /// Entity type, e.g. `diceActorType`
    pub entity_type: String,

    /// Entity id, unique within `entity_type`
    pub entity_id: String,
}

impl EntityAddress {
    /// Creates an address from a type and an id.
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    /// Stable 64-bit fingerprint of the address (FNV-1a).
    ///
    /// Used to derive per-entity seeds; must not change between releases or
    /// seeded runs stop being reproducible.
    pub fn fingerprint(&self) -> u64 {
        const OFFSET: u64 = 0xcbf29ce484222325;
        const PRIME: u64 = 0x100000001b3;

        let mut hash = OFFSET;
        for byte in self
            .entity_type
            .as_bytes()
            .iter()
            .chain(b"/")
            .chain(self.entity_id.as_bytes())
        {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(PRIME);
        }
        hash
    }
}

impl std::fmt::Display for EntityAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// Action carried by a lifecycle event.
///
/// Inbound actions (`start`, `step`, `stop`) each have exactly one
/// acknowledgement action. Anything unrecognised decodes as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    Start,
    Step,
    Stop,
    StartDone,
    StepDone,
    StopDone,
    #[default]
    #[serde(other)]
    Unknown,
}

impl LifecycleAction {
    /// Returns the acknowledgement for an inbound action.
    pub fn ack(&self) -> Option<LifecycleAction> {
        match self {
            Self::Start => Some(Self::StartDone),
            Self::Step => Some(Self::StepDone),
            Self::Stop => Some(Self::StopDone),
            _ => None,
        }
    }

    /// Returns true for `startdone`, `stepdone` and `stopdone`.
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::StartDone | Self::StepDone | Self::StopDone)
    }

    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Step => "step",
            Self::Stop => "stop",
            Self::StartDone => "startdone",
            Self::StepDone => "stepdone",
            Self::StopDone => "stopdone",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

fn is_unknown(action: &LifecycleAction) -> bool {
    *action == LifecycleAction::Unknown
}

/// Payload of a lifecycle event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub value: i64,
}

impl EventPayload {
    fn is_empty(&self) -> bool {
        self.value == 0
    }
}

/// Coarse lifecycle notification exchanged over the event bus.
///
/// Absent fields decode to their zero value and zero values are omitted
/// when encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    #[serde(default, skip_serializing_if = "is_unknown")]
    pub action: LifecycleAction,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,

    #[serde(default, skip_serializing_if = "EventPayload::is_empty")]
    pub payload: EventPayload,
}

impl LifecycleEvent {
    /// Creates an event with the given action and no other fields.
    pub fn new(action: LifecycleAction) -> Self {
        Self {
            action,
            ..Default::default()
        }
    }

    /// Sets the human-readable reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Sets the target (usually the publishing host).
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Sets `payload.value`.
    pub fn with_value(mut self, value: i64) -> Self {
        self.payload.value = value;
        self
    }

    /// Encodes the event as JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes an event from JSON bytes.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// A topic subscription registered by a hosting service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "pubsubname")]
    pub pubsub_name: String,
    pub topic: String,
    pub route: String,
}

impl Subscription {
    /// The subscription every entity-hosting service registers.
    pub fn lifecycle() -> Self {
        Self {
            pubsub_name: LIFECYCLE_PUBSUB.to_string(),
            topic: LIFECYCLE_TOPIC.to_string(),
            route: LIFECYCLE_ROUTE.to_string(),
        }
    }
}
