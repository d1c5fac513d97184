use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliStoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Parser)]
#[command(
    name = "fanout-relay",
    about = "Relays posts from one Telegram channel to up to five others and keeps edits and deletes in sync",
    version
)]
pub struct Cli {
    #[arg(
        long = "bot-token",
        env = "BOT_TOKEN",
        hide_env_values = true,
        help = "Telegram bot token"
    )]
    pub bot_token: String,

    #[arg(
        long = "source-chat-id",
        env = "SOURCE_CHAT_ID",
        allow_hyphen_values = true,
        help = "Chat id of the channel whose posts are relayed"
    )]
    pub source_chat_id: String,

    #[arg(
        long = "target-chat-id",
        env = "TARGET_CHAT_ID",
        value_delimiter = ',',
        allow_hyphen_values = true,
        help = "Initial target channel ids. Only used when the store has no targets configured yet"
    )]
    pub target_chat_id: Vec<String>,

    #[arg(
        long = "store",
        env = "FANOUT_STORE",
        value_enum,
        default_value = "memory",
        help = "Record store backend"
    )]
    pub store: CliStoreBackend,

    #[arg(
        long = "sqlite-path",
        env = "FANOUT_SQLITE_PATH",
        default_value = ".fanout/relay.sqlite",
        help = "Database file used by the sqlite store"
    )]
    pub sqlite_path: PathBuf,

    #[arg(
        long = "log-capacity",
        env = "FANOUT_LOG_CAPACITY",
        default_value_t = 1000,
        value_parser = parse_positive_usize,
        help = "Activity log entries kept by the memory store"
    )]
    pub log_capacity: usize,

    #[arg(
        long = "bind",
        env = "FANOUT_BIND",
        default_value = "127.0.0.1:5000",
        help = "Listen address for the control API"
    )]
    pub bind: String,

    #[arg(
        long = "telegram-api-base",
        env = "FANOUT_TELEGRAM_API_BASE",
        default_value = "https://api.telegram.org",
        help = "Base URL of the Telegram Bot API"
    )]
    pub telegram_api_base: String,

    #[arg(
        long = "http-timeout-ms",
        env = "FANOUT_HTTP_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Timeout for Bot API calls other than long polls"
    )]
    pub http_timeout_ms: u64,

    #[arg(
        long = "poll-timeout-secs",
        env = "FANOUT_POLL_TIMEOUT_SECS",
        default_value_t = 25,
        help = "Long-poll timeout passed to getUpdates"
    )]
    pub poll_timeout_secs: u64,
}

impl Cli {
    /// Checks values clap cannot express before any network activity.
    pub fn validate(&self) -> Result<()> {
        if self.bot_token.trim().is_empty() {
            bail!("--bot-token cannot be empty");
        }
        let source = self.source_chat_id.trim();
        if source.is_empty() {
            bail!("--source-chat-id cannot be empty");
        }
        if source.parse::<i64>().is_err() {
            bail!("--source-chat-id must be a numeric chat id, got '{source}'");
        }
        if self.telegram_api_base.trim().is_empty() {
            bail!("--telegram-api-base cannot be empty");
        }
        Ok(())
    }
}
