mod bootstrap;
mod cli_args;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use crate::bootstrap::{build_store, init_tracing, seed_target_channels};
use crate::cli_args::Cli;
use fanout_engine::FanoutEngine;
use fanout_gateway::{run_relay_gateway, RelayGatewayConfig};
use fanout_runtime::{RelayRuntime, RelayRuntimeConfig};
use fanout_transport::{TelegramBotClient, TelegramClientConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}

async fn run_cli(cli: Cli) -> Result<()> {
    cli.validate()?;
    let source_chat_id = cli.source_chat_id.trim().to_string();

    let store = build_store(&cli)?;
    let client = TelegramBotClient::new(TelegramClientConfig {
        api_base: cli.telegram_api_base.clone(),
        bot_token: cli.bot_token.clone(),
        http_timeout_ms: cli.http_timeout_ms,
    })?;
    let engine = Arc::new(FanoutEngine::new(store, Arc::new(client.clone())));
    seed_target_channels(&engine, &cli).await?;
    tracing::info!(source_chat_id = %source_chat_id, "relay configured");

    let runtime = RelayRuntime::new(
        Arc::clone(&engine),
        client,
        RelayRuntimeConfig {
            source_chat_id: source_chat_id.clone(),
            poll_timeout_secs: cli.poll_timeout_secs,
            transient_error_backoff_initial: Duration::from_millis(500),
            transient_error_backoff_max: Duration::from_secs(30),
        },
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut gateway_task = tokio::spawn(run_relay_gateway(
        RelayGatewayConfig {
            bind: cli.bind.clone(),
            source_chat_id,
        },
        Arc::clone(&engine),
        shutdown_rx.clone(),
    ));
    let mut runtime_task = tokio::spawn(async move { runtime.run(shutdown_rx).await });

    tokio::select! {
        signal = wait_for_shutdown_signal() => {
            tracing::info!(signal, "shutdown signal received");
        }
        result = &mut runtime_task => {
            let _ = shutdown_tx.send(true);
            let _ = gateway_task.await;
            return result.context("relay runtime task failed to join")?;
        }
        result = &mut gateway_task => {
            let _ = shutdown_tx.send(true);
            let _ = runtime_task.await;
            return result.context("control api task failed to join")?;
        }
    }

    let _ = shutdown_tx.send(true);
    runtime_task
        .await
        .context("relay runtime task failed to join")??;
    gateway_task
        .await
        .context("control api task failed to join")??;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        },
        Err(error) => {
            tracing::warn!("failed to install SIGTERM handler: {error}");
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}
