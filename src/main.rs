use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;

use funnelserver::core::config::AppConfig;
use funnelserver::main_module::run_server;
use funnelserver::shared::state::AppState;
use funnelserver::shared::utils::{create_conn, run_migrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;
    info!("Starting {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let pool = create_conn(&config.database.url, config.database.pool_size).map_err(|e| {
        error!("Failed to create database pool: {e}");
        e
    })?;

    let migration_pool = pool.clone();
    tokio::task::spawn_blocking(move || run_migrations(&migration_pool))
        .await?
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {e}"))?;
    info!("Database migrations applied");

    let state = Arc::new(AppState::new(config, pool).await);
    info!(
        "Integrations: stripe={} email={} storage={}",
        state.stripe.is_some(),
        state.email.is_some(),
        state.storage.is_some()
    );

    run_server(state).await?;
    info!("Server stopped");
    Ok(())
}
