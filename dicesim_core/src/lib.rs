//! dicesim Core - Step Orchestration over Addressable Entities
//!
//! A central orchestrator drives a population of independently hosted
//! entities (dice and coins) through synchronized rounds:
//! 1. **Stepping**: pull-style remote invocation of each entity by address,
//!    activated on first use by the directory of whichever host serves it
//! 2. **Lifecycle**: push-style `start`/`step`/`stop` events on a shared
//!    topic, acknowledged by every hosting service
//!
//! Both paths are written against the `dicesim_env` traits, so the same
//! code runs over HTTP in production and in-process in the harness.

pub mod client;
pub mod clock;
pub mod directory;
pub mod entity;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod router;

// Re-export key types for convenience
pub use client::{EntityClient, RetryPolicy};
pub use clock::{default_start_time, SimulationClock};
pub use directory::{DirectoryStats, EntityDirectory};
pub use entity::{
    Coin, CoinFace, CoinFactory, Die, DieFactory, Entity, EntityFactory, Operation, StepContext,
    StepValue, COIN_ENTITY_TYPE, DEFAULT_DIE_SIDES, DIE_ENTITY_TYPE, STEP_OPERATION,
};
pub use error::{EntityError, LifecycleError, OrchestratorError};
pub use lifecycle::{diagnostic_sampler, LifecycleHandler, UnknownActionPolicy};
pub use orchestrator::{
    EntityPool, EntityResult, FanOut, Orchestrator, OrchestratorConfig, RoundRecord, RunState,
    RunStatus, StartOutcome, StepOutcome, Trigger,
};
pub use router::LocalRouter;
