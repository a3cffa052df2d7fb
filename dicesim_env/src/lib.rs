//! dicesim Environment Abstraction Layer
//!
//! This crate provides the seams that let the orchestrator and the entity
//! hosts run either as networked **services** (tokio + HTTP sidecar) or
//! inside the deterministic **simulation** harness.
//!
//! # Intercepted I/O
//!
//! - Time (`now()`, `sleep()`)
//! - Entity invocation (`InvocationTransport::invoke()`)
//! - Lifecycle pub/sub (`EventBus::publish()`, `TopicHandler::on_event()`)
//! - Randomness (`derive_rng()`)
//!
//! By deriving all entropy from a single 64-bit seed, every run is
//! reproducible via its seed number.
//!
//! # Example
//!
//! ```ignore
//! use dicesim_env::{EntityAddress, InvocationTransport};
//!
//! async fn roll<T: InvocationTransport>(transport: &T) -> Result<Vec<u8>, EnvError> {
//!     let die = EntityAddress::new("diceActorType", "die0");
//!     transport.invoke(&die, "step", Vec::new()).await
//! }
//! ```

mod context;
mod error;
mod network;
mod tokio_impl;
mod types;

pub use context::{mix_seed, SimEnvironment};
pub use error::EnvError;
pub use network::{EventBus, InvocationTransport, TopicHandler, TopicResponse};
pub use tokio_impl::TokioEnvironment;
pub use types::{
    EntityAddress, EventPayload, LifecycleAction, LifecycleEvent, Subscription,
    LIFECYCLE_PUBSUB, LIFECYCLE_ROUTE, LIFECYCLE_TOPIC,
};
