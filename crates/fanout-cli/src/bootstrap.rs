use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli_args::{Cli, CliStoreBackend};
use fanout_engine::FanoutEngine;
use fanout_store::{InMemoryRelayStore, RelayStore, SqliteRelayStore};

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

pub(crate) fn build_store(cli: &Cli) -> Result<Arc<dyn RelayStore>> {
    match cli.store {
        CliStoreBackend::Memory => Ok(Arc::new(InMemoryRelayStore::with_log_capacity(
            cli.log_capacity,
        ))),
        CliStoreBackend::Sqlite => {
            let store = SqliteRelayStore::new(&cli.sqlite_path).with_context(|| {
                format!(
                    "failed to open sqlite store at {}",
                    cli.sqlite_path.display()
                )
            })?;
            tracing::info!(path = %store.path().display(), "using sqlite store");
            Ok(Arc::new(store))
        }
    }
}

/// Seeds target channels from the command line unless the store already
/// carries a configured set. Returns whether the store was written.
pub(crate) async fn seed_target_channels(engine: &FanoutEngine, cli: &Cli) -> Result<bool> {
    let configured = engine.target_set().await?;
    if !configured.is_empty() {
        tracing::info!(
            count = configured.len(),
            "keeping target channels from the store"
        );
        return Ok(false);
    }
    if cli.target_chat_id.iter().all(|id| id.trim().is_empty()) {
        tracing::warn!("no target channels configured; new posts will not be relayed");
        return Ok(false);
    }
    match engine.set_targets(cli.target_chat_id.as_slice()).await {
        Ok(targets) => {
            tracing::info!(count = targets.len(), "seeded target channels");
            Ok(true)
        }
        Err(error) => bail!("invalid --target-chat-id: {error}"),
    }
}
