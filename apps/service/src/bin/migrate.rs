use anyhow::{Context, Result};
use tokio_postgres::NoTls;
use tracing_subscriber::EnvFilter;

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url = std::env::var("DB_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .context("DB_URL or DATABASE_URL must be set")?;

    let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
        .await
        .context("connect to postgres")?;
    tokio::spawn(async move {
        if let Err(error) = connection.await {
            tracing::error!(reason = %error, "callkeeper postgres connection error");
        }
    });

    client
        .batch_execute(INIT_SQL)
        .await
        .context("apply schema")?;
    tracing::info!("callkeeper schema applied");
    Ok(())
}
