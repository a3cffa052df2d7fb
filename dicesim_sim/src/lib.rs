//! dicesim Deterministic Simulation Harness
//!
//! This crate runs the whole dicesim system - orchestrator, dice host and
//! coin host - inside one process with every source of non-determinism
//! under control:
//! - **Time**: a virtual clock that moves only when slept on or advanced
//! - **Network**: an in-process transport with injectable faults
//! - **Events**: an in-memory bus that records every published message
//! - **Randomness**: every generator derived from one 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        SimWorld                          │
//! │  ┌──────────────┐   SimTransport   ┌──────────────────┐  │
//! │  │ Orchestrator │ ───────────────► │ dice-host        │  │
//! │  │              │  (fault layer)   │ coin-host        │  │
//! │  └──────────────┘                  └──────────────────┘  │
//! │          │                               ▲               │
//! │          └───────── MemoryBus ───────────┘               │
//! │               (lifecycle topic "core")                   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use dicesim_sim::{SimConfig, SimWorld};
//!
//! let world = SimWorld::new(SimConfig { seed: 99, end_steps: 3, ..Default::default() })?;
//! let status = world.orchestrator.run(Some(Trigger::new("cli"))).await?;
//! ```

mod bus;
mod context;
mod network;
mod runner;
pub mod scenarios;
mod world;

pub use bus::{BusStats, MemoryBus, PublishedMessage};
pub use context::SimContext;
pub use network::{FaultController, SimTransport, TransportStats};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{
    SimConfig, SimOrchestrator, SimWorld, WorldError, COIN_HOST, DICE_HOST, ORCHESTRATOR_HOST,
};
