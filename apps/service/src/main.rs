use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use callkeeper_service::config::Config;
use callkeeper_service::retention::spawn_retention_worker;
use callkeeper_service::server::build_router;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("load configuration")?;
    tracing::info!(
        service = config.service_name,
        build = config.build_sha,
        environment = config.environment.as_str(),
        addr = %config.bind_addr,
        "starting callkeeper"
    );

    let reaper_interval_seconds = config.reaper_interval_seconds;
    let state = callkeeper_service::build_app_state(config).await?;
    spawn_retention_worker(Arc::clone(&state.reaper), reaper_interval_seconds);

    let listener = tokio::net::TcpListener::bind(state.config.bind_addr)
        .await
        .context("bind listener")?;
    axum::serve(listener, build_router(state))
        .await
        .context("serve http")?;
    Ok(())
}
