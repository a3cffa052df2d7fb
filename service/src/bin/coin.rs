//! dicesim coin host service.
//!
//! Hosts `coinActorType` entities on `APP_PORT` (default 7002).

use anyhow::{Context, Result};
use dicesim_core::CoinFactory;
use dicesim_service::actor_host::build_host;
use dicesim_service::{init_tracing, serve, Role, ServiceConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = ServiceConfig::from_env(Role::Coin).context("Invalid configuration")?;
    let router = build_host(&config, CoinFactory).context("Failed to build coin host")?;

    serve(router, config.listen_addr())
        .await
        .context("Coin host server failed")?;
    Ok(())
}
