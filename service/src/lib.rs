//! dicesim Service - HTTP processes behind a sidecar
//!
//! Three processes make up a deployment:
//! - **orchestrator** (`dicesim-orchestrator`): `/start`, `/step`, `/stop`,
//!   `/status` and `/history`; steps entities through the sidecar
//! - **dice host** (`dicesim-dice`) and **coin host** (`dicesim-coin`):
//!   serve entity invocations forwarded by the sidecar and answer lifecycle
//!   events on the shared topic
//!
//! ```text
//!  orchestrator ──invoke──► sidecar ──PUT /actors/..──► dice/coin host
//!       │                      ▲                              │
//!       └──────publish──────►  │  ◄──────publish ack──────────┘
//!                         POST /endpoint
//! ```

pub mod actor_host;
pub mod config;
pub mod orchestrator_api;
pub mod server;
pub mod sidecar;

pub use actor_host::HostState;
pub use config::{ConfigError, Role, ServiceConfig};
pub use orchestrator_api::{ApiError, ApiState};
pub use server::{init_tracing, serve, ServerError};
pub use sidecar::SidecarClient;
