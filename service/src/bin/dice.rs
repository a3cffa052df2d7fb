//! dicesim dice host service.
//!
//! Hosts `diceActorType` entities on `APP_PORT` (default 7001).

use anyhow::{Context, Result};
use dicesim_core::DieFactory;
use dicesim_service::actor_host::build_host;
use dicesim_service::{init_tracing, serve, Role, ServiceConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = ServiceConfig::from_env(Role::Dice).context("Invalid configuration")?;
    let factory = DieFactory::new(config.die_sides).context("Invalid die configuration")?;
    let router = build_host(&config, factory).context("Failed to build dice host")?;

    serve(router, config.listen_addr())
        .await
        .context("Dice host server failed")?;
    Ok(())
}
