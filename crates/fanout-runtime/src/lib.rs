//! Long-polling runtime that feeds source-chat updates into the fan-out engine.
//!
//! Startup clears any webhook and marks the relay running. A 409 conflict
//! (another instance polling the same bot) leaves the relay marked stopped
//! and the runtime idle until shutdown; the rest of the process keeps
//! serving.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::Value;
use tokio::sync::watch;

use fanout_engine::FanoutEngine;
use fanout_transport::TelegramBotClient;
use fanout_types::{CounterKind, LogKind, LogStatus, NewLogEntry, SourceKey};

mod delete_command;
mod update_parser;

pub use delete_command::{
    parse_delete_argument, render_delete_reply, DeleteArgument, DELETE_USAGE, INVALID_ID_REPLY,
};
pub use update_parser::{next_update_offset, parse_update, DeleteCommand, RelayUpdate};

pub const CONFLICT_LOG_MESSAGE: &str =
    "Bot startup failed: Another instance is already running (409 Conflict)";
pub const STOPPED_LOG_MESSAGE: &str = "Bot stopped gracefully";

#[derive(Debug, Clone)]
pub struct RelayRuntimeConfig {
    pub source_chat_id: String,
    pub poll_timeout_secs: u64,
    pub transient_error_backoff_initial: Duration,
    pub transient_error_backoff_max: Duration,
}

impl Default for RelayRuntimeConfig {
    fn default() -> Self {
        Self {
            source_chat_id: String::new(),
            poll_timeout_secs: 25,
            transient_error_backoff_initial: Duration::from_millis(500),
            transient_error_backoff_max: Duration::from_secs(30),
        }
    }
}

impl RelayRuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.source_chat_id.trim().is_empty() {
            bail!("source chat id cannot be empty");
        }
        if self.transient_error_backoff_initial.is_zero() {
            bail!("transient_error_backoff_initial must be greater than 0");
        }
        if self.transient_error_backoff_max < self.transient_error_backoff_initial {
            bail!("transient_error_backoff_max must be >= transient_error_backoff_initial");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupOutcome {
    Running,
    /// Another consumer owns the update feed; forwarding stays inert.
    Conflict,
}

fn compute_poll_retry_delay(failure_count: u32, initial: Duration, max: Duration) -> Duration {
    let mut delay = initial;
    for _ in 1..failure_count {
        delay = delay.saturating_mul(2);
        if delay >= max {
            return max;
        }
    }
    std::cmp::min(delay, max)
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender counts as a shutdown request.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

pub struct RelayRuntime {
    engine: Arc<FanoutEngine>,
    client: TelegramBotClient,
    config: RelayRuntimeConfig,
}

impl RelayRuntime {
    pub fn new(
        engine: Arc<FanoutEngine>,
        client: TelegramBotClient,
        config: RelayRuntimeConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine,
            client,
            config,
        })
    }

    /// Clears the webhook and marks the relay running.
    pub async fn start(&self) -> Result<StartupOutcome> {
        let store = self.engine.store();
        match self.client.delete_webhook(true).await {
            Ok(()) => {}
            Err(failure) if failure.is_conflict() => return self.enter_conflict().await,
            Err(failure) => {
                store.set_running(false).await?;
                store
                    .append_log(NewLogEntry::system(
                        LogKind::Error,
                        LogStatus::Failed,
                        format!("Bot startup failed: {failure}"),
                    ))
                    .await?;
                bail!("bot startup failed: {failure}");
            }
        }
        store.set_running(true).await?;
        tracing::info!(
            source_chat_id = %self.config.source_chat_id,
            "relay started with long polling"
        );
        Ok(StartupOutcome::Running)
    }

    /// Polls until `shutdown` flips to true, then marks the relay stopped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.start().await? == StartupOutcome::Conflict {
            wait_for_shutdown(&mut shutdown).await;
            return self.stop().await;
        }

        let mut offset = 0i64;
        let mut poll_failure_count = 0u32;
        loop {
            let polled = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                polled = self.client.get_updates(offset, self.config.poll_timeout_secs) => polled,
            };

            match polled {
                Ok(updates) => {
                    poll_failure_count = 0;
                    for update in &updates {
                        if let Some(next) = next_update_offset(update) {
                            offset = offset.max(next);
                        }
                        if let Err(error) = self.process_update(update).await {
                            self.record_runtime_error(&error).await;
                        }
                    }
                }
                Err(failure) if failure.is_conflict() => {
                    self.enter_conflict().await?;
                    wait_for_shutdown(&mut shutdown).await;
                    break;
                }
                Err(failure) => {
                    poll_failure_count = poll_failure_count.saturating_add(1);
                    let delay = compute_poll_retry_delay(
                        poll_failure_count,
                        self.config.transient_error_backoff_initial,
                        self.config.transient_error_backoff_max,
                    );
                    tracing::warn!(
                        failures = poll_failure_count,
                        delay_ms = delay.as_millis() as u64,
                        kind = failure.kind.as_str(),
                        "update poll failed: {failure}"
                    );
                    tokio::select! {
                        _ = wait_for_shutdown(&mut shutdown) => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.stop().await
    }

    /// Routes one raw update to the engine.
    pub async fn process_update(&self, update: &Value) -> Result<()> {
        match parse_update(update, &self.config.source_chat_id) {
            RelayUpdate::NewPost(post) => {
                self.engine.handle_new_post(&post).await?;
            }
            RelayUpdate::Edit(edit) => {
                self.engine.handle_edit(&edit).await?;
            }
            RelayUpdate::DeleteCommand(command) => {
                self.handle_delete_command(&command).await?;
            }
            RelayUpdate::Ignored => {}
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let store = self.engine.store();
        store.set_running(false).await?;
        store
            .append_log(NewLogEntry::system(
                LogKind::Error,
                LogStatus::Stopped,
                STOPPED_LOG_MESSAGE,
            ))
            .await?;
        tracing::info!("relay stopped");
        Ok(())
    }

    async fn handle_delete_command(&self, command: &DeleteCommand) -> Result<()> {
        let store = self.engine.store();
        let command_key = SourceKey::new(command.chat_id.clone(), 0);
        match parse_delete_argument(command.argument.as_deref()) {
            DeleteArgument::Missing => {
                store.increment(CounterKind::Errors).await?;
                store
                    .append_log(NewLogEntry::error(
                        &command_key,
                        "Delete command failed: missing message ID",
                    ))
                    .await?;
                self.reply(&command.chat_id, DELETE_USAGE).await;
            }
            DeleteArgument::Invalid(raw) => {
                store.increment(CounterKind::Errors).await?;
                store
                    .append_log(NewLogEntry::error(
                        &command_key,
                        format!("Delete command failed: invalid message ID \"{raw}\""),
                    ))
                    .await?;
                self.reply(&command.chat_id, INVALID_ID_REPLY).await;
            }
            DeleteArgument::Message(message) => {
                let key = SourceKey::new(command.chat_id.clone(), message);
                let outcome = self.engine.handle_delete(&key).await?;
                self.reply(&command.chat_id, &render_delete_reply(message, &outcome))
                    .await;
            }
        }
        Ok(())
    }

    async fn reply(&self, chat_id: &str, text: &str) {
        if let Err(failure) = self.client.send_message(chat_id, text).await {
            tracing::warn!(chat_id, "failed to send command reply: {failure}");
        }
    }

    async fn enter_conflict(&self) -> Result<StartupOutcome> {
        tracing::error!(
            "another instance is already polling this bot; forwarding stays inert until it stops"
        );
        let store = self.engine.store();
        store.set_running(false).await?;
        store
            .append_log(NewLogEntry::system(
                LogKind::Error,
                LogStatus::Failed,
                CONFLICT_LOG_MESSAGE,
            ))
            .await?;
        Ok(StartupOutcome::Conflict)
    }

    async fn record_runtime_error(&self, error: &anyhow::Error) {
        tracing::error!("update handling failed: {error:#}");
        let store = self.engine.store();
        let recorded = async {
            store.increment(CounterKind::Errors).await?;
            store
                .append_log(NewLogEntry::system(
                    LogKind::Error,
                    LogStatus::Failed,
                    format!("Bot runtime error: {error}"),
                ))
                .await?;
            Ok::<(), fanout_store::StoreError>(())
        };
        if let Err(store_error) = recorded.await {
            tracing::error!("failed to record runtime error: {store_error}");
        }
    }
}
