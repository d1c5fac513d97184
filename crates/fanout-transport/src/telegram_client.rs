//! Telegram Bot API client used for relaying posts and polling updates.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{PostTransport, TransportFailure, TransportFailureKind, TransportResult};
use fanout_types::{FormattedText, MediaRef, MessageId};

const TELEGRAM_DEFAULT_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct TelegramClientConfig {
    pub api_base: String,
    pub bot_token: String,
    pub http_timeout_ms: u64,
}

impl Default for TelegramClientConfig {
    fn default() -> Self {
        Self {
            api_base: TELEGRAM_DEFAULT_API_BASE.to_string(),
            bot_token: String::new(),
            http_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TelegramEnvelope {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessageRef {
    message_id: MessageId,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    #[serde(default)]
    file_path: Option<String>,
}

#[derive(Clone)]
pub struct TelegramBotClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl std::fmt::Debug for TelegramBotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBotClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl TelegramBotClient {
    pub fn new(config: TelegramClientConfig) -> Result<Self> {
        let bot_token = config.bot_token.trim().to_string();
        if bot_token.is_empty() {
            bail!("telegram bot token cannot be empty");
        }
        let api_base = config.api_base.trim().trim_end_matches('/').to_string();
        if api_base.is_empty() {
            bail!("telegram api base cannot be empty");
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms.max(1)))
            .build()
            .context("failed to create telegram api client")?;
        Ok(Self {
            http,
            api_base,
            bot_token,
        })
    }

    /// Long-polls `getUpdates`, returning raw update objects in delivery order.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> TransportResult<Vec<Value>> {
        let result = self
            .call_method(
                "getUpdates",
                json!({
                    "offset": offset,
                    "timeout": timeout_secs,
                    "allowed_updates": [
                        "message",
                        "edited_message",
                        "channel_post",
                        "edited_channel_post"
                    ],
                }),
                Some(Duration::from_secs(timeout_secs) + LONG_POLL_GRACE),
            )
            .await?;
        match result {
            Value::Array(updates) => Ok(updates),
            other => Err(TransportFailure::new(
                TransportFailureKind::InvalidResponse,
                format!("getUpdates returned a non-array result: {other}"),
            )),
        }
    }

    /// Removes any webhook so long polling does not collide with it.
    pub async fn delete_webhook(&self, drop_pending_updates: bool) -> TransportResult<()> {
        self.call_method(
            "deleteWebhook",
            json!({ "drop_pending_updates": drop_pending_updates }),
            None,
        )
        .await
        .map(|_| ())
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> TransportResult<MessageId> {
        let result = self
            .call_method("sendMessage", json!({ "chat_id": chat_id, "text": text }), None)
            .await?;
        decode_message_ref("sendMessage", result)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn call_method(
        &self,
        method: &str,
        body: Value,
        timeout: Option<Duration>,
    ) -> TransportResult<Value> {
        let mut request = self.http.post(self.method_url(method)).json(&body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(|error| {
            TransportFailure::new(
                TransportFailureKind::Network,
                format!("{method} request failed: {}", error.without_url()),
            )
        })?;

        let status = response.status();
        let raw = response.text().await.unwrap_or_default();
        let envelope = match serde_json::from_str::<TelegramEnvelope>(&raw) {
            Ok(envelope) => envelope,
            Err(_) => {
                return Err(TransportFailure::new(
                    classify_status(status),
                    format!(
                        "{}: {method} returned a non-JSON body",
                        status.as_u16()
                    ),
                )
                .with_http_status(status.as_u16()));
            }
        };

        if envelope.ok && status.is_success() {
            return Ok(envelope.result.unwrap_or(Value::Null));
        }

        let code = envelope.error_code.unwrap_or_else(|| status.as_u16());
        let description = envelope
            .description
            .unwrap_or_else(|| "unknown error".to_string());
        let kind = StatusCode::from_u16(code)
            .map(classify_status)
            .unwrap_or(TransportFailureKind::Rejected);
        tracing::debug!(
            method,
            http_status = status.as_u16(),
            error_code = code,
            "telegram api call failed"
        );
        Err(TransportFailure::new(kind, format!("{code}: {description}"))
            .with_http_status(status.as_u16()))
    }
}

fn classify_status(status: StatusCode) -> TransportFailureKind {
    if status == StatusCode::CONFLICT {
        TransportFailureKind::Conflict
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        TransportFailureKind::RateLimited
    } else if status.is_server_error() {
        TransportFailureKind::Network
    } else {
        TransportFailureKind::Rejected
    }
}

fn decode_message_ref(method: &str, result: Value) -> TransportResult<MessageId> {
    serde_json::from_value::<TelegramMessageRef>(result)
        .map(|message| message.message_id)
        .map_err(|error| {
            TransportFailure::new(
                TransportFailureKind::InvalidResponse,
                format!("{method} result missing message_id: {error}"),
            )
        })
}

#[async_trait]
impl PostTransport for TelegramBotClient {
    async fn copy_post(
        &self,
        target_channel: &str,
        source_channel: &str,
        source_message: MessageId,
        reply_anchor: Option<MessageId>,
    ) -> TransportResult<MessageId> {
        let mut body = json!({
            "chat_id": target_channel,
            "from_chat_id": source_channel,
            "message_id": source_message,
        });
        if let Some(reply_anchor) = reply_anchor {
            body["reply_to_message_id"] = json!(reply_anchor);
        }
        let result = self.call_method("copyMessage", body, None).await?;
        decode_message_ref("copyMessage", result)
    }

    async fn edit_post_text(
        &self,
        channel: &str,
        message: MessageId,
        text: &FormattedText,
    ) -> TransportResult<()> {
        let mut body = json!({
            "chat_id": channel,
            "message_id": message,
            "text": text.text,
        });
        if !text.entities.is_empty() {
            body["entities"] = Value::Array(text.entities.clone());
        }
        self.call_method("editMessageText", body, None)
            .await
            .map(|_| ())
    }

    async fn edit_post_caption(
        &self,
        channel: &str,
        message: MessageId,
        caption: &FormattedText,
    ) -> TransportResult<()> {
        let mut body = json!({
            "chat_id": channel,
            "message_id": message,
            "caption": caption.text,
        });
        if !caption.entities.is_empty() {
            body["caption_entities"] = Value::Array(caption.entities.clone());
        }
        self.call_method("editMessageCaption", body, None)
            .await
            .map(|_| ())
    }

    async fn delete_post(&self, channel: &str, message: MessageId) -> TransportResult<()> {
        self.call_method(
            "deleteMessage",
            json!({ "chat_id": channel, "message_id": message }),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn fetch_media_url(&self, media: &MediaRef) -> TransportResult<String> {
        let result = self
            .call_method("getFile", json!({ "file_id": media.file_id }), None)
            .await?;
        let file_path = serde_json::from_value::<TelegramFile>(result)
            .ok()
            .and_then(|file| file.file_path)
            .filter(|path| !path.trim().is_empty())
            .ok_or_else(|| {
                TransportFailure::new(
                    TransportFailureKind::InvalidResponse,
                    "getFile result missing file_path",
                )
            })?;
        Ok(format!(
            "{}/file/bot{}/{}",
            self.api_base, self.bot_token, file_path
        ))
    }
}
