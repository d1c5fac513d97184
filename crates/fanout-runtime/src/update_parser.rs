//! Decoding of raw Bot API updates into relay events.

use serde::Deserialize;
use serde_json::Value;

use fanout_types::{
    EditContent, FormattedText, MediaRef, MessageId, NewPost, PostEdit, PostPayload, SourceKey,
};

const DELETE_COMMAND: &str = "/delete";

#[derive(Debug, Clone, PartialEq)]
pub enum RelayUpdate {
    NewPost(NewPost),
    Edit(PostEdit),
    DeleteCommand(DeleteCommand),
    /// Not from the source chat, or a kind the relay does not handle.
    Ignored,
}

/// `/delete <id>` issued inside the source chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCommand {
    pub chat_id: String,
    pub argument: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    #[serde(default)]
    message: Option<TelegramMessage>,
    #[serde(default)]
    channel_post: Option<TelegramMessage>,
    #[serde(default)]
    edited_message: Option<TelegramMessage>,
    #[serde(default)]
    edited_channel_post: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: MessageId,
    chat: TelegramChat,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    entities: Vec<Value>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    caption_entities: Vec<Value>,
    #[serde(default)]
    photo: Vec<TelegramPhotoSize>,
    #[serde(default)]
    reply_to_message: Option<TelegramMessageRef>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramPhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct TelegramMessageRef {
    message_id: MessageId,
}

/// Offset to acknowledge `update` with on the next poll.
pub fn next_update_offset(update: &Value) -> Option<i64> {
    update
        .get("update_id")
        .and_then(Value::as_i64)
        .map(|update_id| update_id.saturating_add(1))
}

pub fn parse_update(update: &Value, source_chat_id: &str) -> RelayUpdate {
    let parsed = match serde_json::from_value::<TelegramUpdate>(update.clone()) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::debug!("skipping undecodable update: {error}");
            return RelayUpdate::Ignored;
        }
    };

    if let Some(message) = parsed.message.or(parsed.channel_post) {
        if !is_source_chat(&message, source_chat_id) {
            return RelayUpdate::Ignored;
        }
        if let Some(argument) = message.text.as_deref().and_then(delete_command_argument) {
            return RelayUpdate::DeleteCommand(DeleteCommand {
                chat_id: message.chat.id.to_string(),
                argument,
            });
        }
        return RelayUpdate::NewPost(new_post_from(message));
    }

    if let Some(message) = parsed.edited_message.or(parsed.edited_channel_post) {
        if !is_source_chat(&message, source_chat_id) {
            return RelayUpdate::Ignored;
        }
        return RelayUpdate::Edit(edit_from(message));
    }

    RelayUpdate::Ignored
}

fn is_source_chat(message: &TelegramMessage, source_chat_id: &str) -> bool {
    message.chat.id.to_string() == source_chat_id.trim()
}

/// Returns `Some(argument)` when `text` is a `/delete` command, including the
/// `/delete@botname` form.
fn delete_command_argument(text: &str) -> Option<Option<String>> {
    let mut tokens = text.split_whitespace();
    let command = tokens.next()?;
    let name = command.split('@').next().unwrap_or(command);
    if name != DELETE_COMMAND {
        return None;
    }
    Some(tokens.next().map(str::to_string))
}

fn new_post_from(message: TelegramMessage) -> NewPost {
    NewPost {
        key: SourceKey::new(message.chat.id.to_string(), message.message_id),
        reply_to: message.reply_to_message.map(|reply| reply.message_id),
        payload: PostPayload {
            text: message.text,
            caption: message.caption,
            photo: message.photo.into_iter().last().map(|size| MediaRef {
                file_id: size.file_id,
            }),
        },
    }
}

fn edit_from(message: TelegramMessage) -> PostEdit {
    let content = match (message.text, message.caption) {
        (Some(text), _) => Some(EditContent::Text(FormattedText {
            text,
            entities: message.entities,
        })),
        (None, Some(caption)) => Some(EditContent::Caption(FormattedText {
            text: caption,
            entities: message.caption_entities,
        })),
        (None, None) => None,
    };
    PostEdit {
        key: SourceKey::new(message.chat.id.to_string(), message.message_id),
        content,
    }
}
