use fanout_types::{DeleteOutcome, MessageId};

pub const DELETE_USAGE: &str = "Usage: /delete <message_id>\nExample: /delete 12345";
pub const INVALID_ID_REPLY: &str = "Invalid message ID. Please provide a numeric message ID.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteArgument {
    Missing,
    Invalid(String),
    Message(MessageId),
}

pub fn parse_delete_argument(argument: Option<&str>) -> DeleteArgument {
    match argument.map(str::trim).filter(|value| !value.is_empty()) {
        None => DeleteArgument::Missing,
        Some(raw) => match raw.parse::<MessageId>() {
            Ok(message) if message > 0 => DeleteArgument::Message(message),
            _ => DeleteArgument::Invalid(raw.to_string()),
        },
    }
}

/// Chat reply for a finished delete command.
pub fn render_delete_reply(message: MessageId, outcome: &DeleteOutcome) -> String {
    if outcome.is_not_found() {
        return "❌ Message not found in forwarding history".to_string();
    }
    if !outcome.success {
        return format!("❌ Failed to delete message #{message} from any channels.");
    }
    if outcome.partial_failure {
        let failed = outcome.remaining_count;
        return format!(
            "⚠️ Message #{message} deleted from {} of {} channels. {failed} failed - you can retry.",
            outcome.success_count, outcome.total_count
        );
    }
    format!(
        "✅ Message #{message} deleted from all {} channels.",
        outcome.success_count
    )
}
