//! dicesim orchestrator service.
//!
//! Listens on `APP_PORT` (default 6001) and steps dice and coins through
//! the sidecar at `DAPR_HOST:DAPR_HTTP_PORT`.

use anyhow::{Context, Result};
use dicesim_core::Orchestrator;
use dicesim_env::TokioEnvironment;
use dicesim_service::orchestrator_api::{create_router, ApiState};
use dicesim_service::{init_tracing, serve, Role, ServiceConfig, SidecarClient};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = ServiceConfig::from_env(Role::Orchestrator).context("Invalid configuration")?;
    let env = TokioEnvironment::shared(config.seed);
    let sidecar = Arc::new(SidecarClient::new(config.sidecar_base_url()));
    let orchestrator = Arc::new(
        Orchestrator::new(config.orchestrator_config(), sidecar, env)
            .context("Invalid orchestrator configuration")?,
    );

    info!(
        entities = orchestrator.addresses().len(),
        end_steps = config.end_steps,
        auto_step = config.auto_step,
        "You can start a simulation by calling http://localhost:{}/start",
        config.port
    );

    serve(create_router(ApiState::new(orchestrator)), config.listen_addr())
        .await
        .context("Orchestrator server failed")?;
    Ok(())
}
