//! Transport contract consumed by the fan-out engine plus the Telegram Bot
//! API implementation of it.
//!
//! Every call returns a tagged `Result`; a failure is terminal for that one
//! target on that one attempt. Timeouts and connection policy belong to the
//! concrete client, not to callers.

use async_trait::async_trait;
use fanout_types::{FormattedText, MediaRef, MessageId};
use thiserror::Error;

pub mod telegram_client;

pub use telegram_client::{TelegramBotClient, TelegramClientConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportFailureKind {
    /// Another instance already consumes the bot's update feed (HTTP 409).
    Conflict,
    RateLimited,
    /// The platform rejected the call (bad chat, missing rights, gone message).
    Rejected,
    Network,
    InvalidResponse,
}

impl TransportFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::RateLimited => "rate_limited",
            Self::Rejected => "rejected",
            Self::Network => "network",
            Self::InvalidResponse => "invalid_response",
        }
    }
}

/// Channel-specific failure of one transport call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct TransportFailure {
    pub kind: TransportFailureKind,
    pub reason: String,
    pub http_status: Option<u16>,
}

impl TransportFailure {
    pub fn new(kind: TransportFailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            http_status: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::new(TransportFailureKind::Rejected, reason)
    }

    pub fn with_http_status(mut self, http_status: u16) -> Self {
        self.http_status = Some(http_status);
        self
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == TransportFailureKind::Conflict
    }
}

pub type TransportResult<T> = Result<T, TransportFailure>;

/// Post-level operations the relay needs from a messaging platform.
#[async_trait]
pub trait PostTransport: Send + Sync {
    /// Copies `source_message` from `source_channel` into `target_channel`,
    /// optionally as a reply to `reply_anchor` in the target. Returns the id
    /// of the new copy.
    async fn copy_post(
        &self,
        target_channel: &str,
        source_channel: &str,
        source_message: MessageId,
        reply_anchor: Option<MessageId>,
    ) -> TransportResult<MessageId>;

    async fn edit_post_text(
        &self,
        channel: &str,
        message: MessageId,
        text: &FormattedText,
    ) -> TransportResult<()>;

    async fn edit_post_caption(
        &self,
        channel: &str,
        message: MessageId,
        caption: &FormattedText,
    ) -> TransportResult<()>;

    async fn delete_post(&self, channel: &str, message: MessageId) -> TransportResult<()>;

    /// Resolves a downloadable URL for a platform-hosted media object.
    async fn fetch_media_url(&self, media: &MediaRef) -> TransportResult<String>;
}
