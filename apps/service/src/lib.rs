#![forbid(unsafe_code)]

pub mod calls;
pub mod config;
pub mod db;
pub mod directory;
pub mod retention;
pub mod server;
pub mod vault;
pub mod webhooks;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::calls::service::{CallLifecycleManager, CallerRegistry};
use crate::config::Config;
use crate::retention::RetentionReaper;
use crate::server::AppState;
use crate::vault::CredentialVault;
use crate::webhooks::dedup::DedupCache;

/// Wires stores and services into the shared state the router runs on.
/// Without a database URL the service runs on in-memory stores, which is
/// what local development and the test suite use.
pub async fn build_app_state(config: Config) -> Result<AppState> {
    let (calls, directory) = match &config.db_url {
        Some(url) => {
            let db = Arc::new(db::CallkeeperDb::connect(url).await?);
            (
                calls::store::postgres(db.clone()),
                directory::postgres(db),
            )
        }
        None => {
            tracing::warn!("no database configured, using in-memory stores");
            (calls::store::memory(), directory::memory())
        }
    };

    let vault = Arc::new(
        CredentialVault::new(&config.master_encryption_key)
            .context("initialize credential vault")?,
    );
    let registry = Arc::new(CallerRegistry::new(calls.clone()));
    let lifecycle = Arc::new(CallLifecycleManager::new(
        calls.clone(),
        directory.clone(),
        registry.clone(),
    ));
    let dedup = Arc::new(DedupCache::new(config.dedup_capacity));
    let reaper = Arc::new(RetentionReaper::new(
        calls.clone(),
        Duration::from_secs(config.reaper_timeout_seconds),
    ));

    Ok(AppState {
        config: Arc::new(config),
        directory,
        calls,
        registry,
        lifecycle,
        vault,
        dedup,
        reaper,
        started_at: Utc::now(),
    })
}
