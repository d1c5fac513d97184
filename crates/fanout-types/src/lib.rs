//! Shared data types for the channel fan-out relay.
//!
//! Source events, the forward mapping (source post to target copies), the
//! operator-facing activity log, counters and run status all live here so
//! the store, transport, engine and control surfaces agree on one model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Platform message identifier. Unique per channel.
pub type MessageId = i64;

/// Maximum number of target channels a source post is relayed to.
pub const MAX_TARGET_CHANNELS: usize = 5;

/// Source channel label used for log entries not tied to a real post.
pub const SYSTEM_SOURCE_CHANNEL: &str = "system";

/// Error returned when a persisted enum label is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} label '{value}'")]
pub struct UnknownLabelError {
    pub kind: &'static str,
    pub value: String,
}

/// Identifies one post in the source channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    pub source_channel: String,
    pub source_message: MessageId,
}

impl SourceKey {
    pub fn new(source_channel: impl Into<String>, source_message: MessageId) -> Self {
        Self {
            source_channel: source_channel.into(),
            source_message,
        }
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source_channel, self.source_message)
    }
}

/// Reference to a media object hosted by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub file_id: String,
}

/// Content carried by a new source post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostPayload {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    /// Largest rendition of an attached photo, if any.
    #[serde(default)]
    pub photo: Option<MediaRef>,
}

impl PostPayload {
    /// Text preserved in the activity log: the message text, else its caption.
    pub fn preserved_text(&self) -> String {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or_default()
            .to_string()
    }

    pub fn has_photo(&self) -> bool {
        self.photo.is_some()
    }
}

/// Text with the formatting entities the platform attached to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormattedText {
    pub text: String,
    #[serde(default)]
    pub entities: Vec<Value>,
}

impl FormattedText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            entities: Vec::new(),
        }
    }
}

/// Replacement content of an edited source post. Text and caption are
/// mutually exclusive upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EditContent {
    Text(FormattedText),
    Caption(FormattedText),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub key: SourceKey,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub payload: PostPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostEdit {
    pub key: SourceKey,
    /// `None` for edits that touch neither text nor caption (media swaps).
    #[serde(default)]
    pub content: Option<EditContent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub key: SourceKey,
}

/// Inbound event observed in the source channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum SourceEvent {
    NewPost(NewPost),
    Edit(PostEdit),
    Delete(DeleteRequest),
}

impl SourceEvent {
    pub fn key(&self) -> &SourceKey {
        match self {
            Self::NewPost(post) => &post.key,
            Self::Edit(edit) => &edit.key,
            Self::Delete(request) => &request.key,
        }
    }
}

/// One copy of a source post living in a target channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetCopy {
    pub target_channel: String,
    pub target_message: MessageId,
}

impl TargetCopy {
    pub fn new(target_channel: impl Into<String>, target_message: MessageId) -> Self {
        Self {
            target_channel: target_channel.into(),
            target_message,
        }
    }
}

/// Copies produced for one source post, in the order they were created,
/// plus whether the source post itself has already been deleted.
///
/// Stores never hold a settled record (no copies left and the source post
/// gone): a settled record means "no mapping".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRecord {
    copies: Vec<TargetCopy>,
    #[serde(default)]
    source_deleted: bool,
}

impl ForwardRecord {
    pub fn new(copies: Vec<TargetCopy>) -> Self {
        Self {
            copies,
            source_deleted: false,
        }
    }

    pub fn with_source_deleted(mut self, source_deleted: bool) -> Self {
        self.source_deleted = source_deleted;
        self
    }

    pub fn is_source_deleted(&self) -> bool {
        self.source_deleted
    }

    /// Nothing left to delete: every copy and the source post are gone.
    pub fn is_settled(&self) -> bool {
        self.source_deleted && self.copies.is_empty()
    }

    /// Live posts a delete would still have to remove, source included.
    pub fn pending_deletes(&self) -> usize {
        self.copies.len() + usize::from(!self.source_deleted)
    }

    pub fn copies(&self) -> &[TargetCopy] {
        &self.copies
    }

    pub fn into_copies(self) -> Vec<TargetCopy> {
        self.copies
    }

    pub fn len(&self) -> usize {
        self.copies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Copy used to summarize a multi-target operation in one log line.
    pub fn representative(&self) -> Option<&TargetCopy> {
        self.copies.first()
    }

    pub fn copy_in(&self, target_channel: &str) -> Option<&TargetCopy> {
        self.copies
            .iter()
            .find(|copy| copy.target_channel == target_channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.copies.iter().map(|copy| copy.target_channel.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    Forwarded,
    Edited,
    Deleted,
    Errors,
}

impl CounterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forwarded => "forwarded",
            Self::Edited => "edited",
            Self::Deleted => "deleted",
            Self::Errors => "errors",
        }
    }
}

/// Running totals. Only the fan-out engine increments them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub forwarded: u64,
    pub edited: u64,
    pub deleted: u64,
    pub errors: u64,
}

impl Counters {
    pub fn bump(&mut self, kind: CounterKind) {
        let slot = match kind {
            CounterKind::Forwarded => &mut self.forwarded,
            CounterKind::Edited => &mut self.edited,
            CounterKind::Deleted => &mut self.deleted,
            CounterKind::Errors => &mut self.errors,
        };
        *slot = slot.saturating_add(1);
    }

    pub fn get(&self, kind: CounterKind) -> u64 {
        match kind {
            CounterKind::Forwarded => self.forwarded,
            CounterKind::Edited => self.edited,
            CounterKind::Deleted => self.deleted,
            CounterKind::Errors => self.errors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub is_running: bool,
    pub is_paused: bool,
    /// Reset on every running-state change so uptime covers the current run only.
    pub start_time: DateTime<Utc>,
}

impl RunStatus {
    pub fn stopped(now: DateTime<Utc>) -> Self {
        Self {
            is_running: false,
            is_paused: false,
            start_time: now,
        }
    }

    pub fn uptime_secs(&self, now: DateTime<Utc>) -> u64 {
        if !self.is_running {
            return 0;
        }
        u64::try_from((now - self.start_time).num_seconds()).unwrap_or(0)
    }
}

/// Snapshot served to the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    pub is_running: bool,
    pub is_paused: bool,
    pub counters: Counters,
    pub uptime_secs: u64,
}

impl RelayStats {
    pub fn from_parts(status: RunStatus, counters: Counters, now: DateTime<Utc>) -> Self {
        Self {
            is_running: status.is_running,
            is_paused: status.is_paused,
            counters,
            uptime_secs: status.uptime_secs(now),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Forward,
    Edit,
    Delete,
    Error,
    Info,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Error => "error",
            Self::Info => "info",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownLabelError> {
        match value {
            "forward" => Ok(Self::Forward),
            "edit" => Ok(Self::Edit),
            "delete" => Ok(Self::Delete),
            "error" => Ok(Self::Error),
            "info" => Ok(Self::Info),
            _ => Err(UnknownLabelError {
                kind: "log_kind",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    /// Completed, but not the way the operator asked for.
    Warning,
    Failed,
    Stopped,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownLabelError> {
        match value {
            "success" => Ok(Self::Success),
            "warning" => Ok(Self::Warning),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            _ => Err(UnknownLabelError {
                kind: "log_status",
                value: value.to_string(),
            }),
        }
    }
}

/// Text and media metadata kept on forward logs so later deletes can show
/// what was removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreservedContent {
    pub message_text: Option<String>,
    pub has_photo: bool,
    pub photo_url: Option<String>,
}

/// Log entry before the store assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLogEntry {
    pub kind: LogKind,
    pub source_channel: String,
    pub source_message: MessageId,
    pub target_message: Option<MessageId>,
    pub status: LogStatus,
    pub message: String,
    #[serde(default)]
    pub preserved: PreservedContent,
}

impl NewLogEntry {
    pub fn new(
        kind: LogKind,
        status: LogStatus,
        key: &SourceKey,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            source_channel: key.source_channel.clone(),
            source_message: key.source_message,
            target_message: None,
            status,
            message: message.into(),
            preserved: PreservedContent::default(),
        }
    }

    /// Entry not tied to a source post (startup, shutdown, configuration).
    pub fn system(kind: LogKind, status: LogStatus, message: impl Into<String>) -> Self {
        Self::new(kind, status, &SourceKey::new(SYSTEM_SOURCE_CHANNEL, 0), message)
    }

    pub fn error(key: &SourceKey, message: impl Into<String>) -> Self {
        Self::new(LogKind::Error, LogStatus::Failed, key, message)
    }

    pub fn with_target(mut self, target_message: Option<MessageId>) -> Self {
        self.target_message = target_message;
        self
    }

    pub fn with_preserved(mut self, preserved: PreservedContent) -> Self {
        self.preserved = preserved;
        self
    }
}

/// Immutable activity log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    pub source_channel: String,
    pub source_message: MessageId,
    pub target_message: Option<MessageId>,
    pub status: LogStatus,
    pub message: String,
    #[serde(default)]
    pub preserved: PreservedContent,
}

impl LogEntry {
    pub fn from_new(id: u64, timestamp: DateTime<Utc>, entry: NewLogEntry) -> Self {
        Self {
            id,
            timestamp,
            kind: entry.kind,
            source_channel: entry.source_channel,
            source_message: entry.source_message,
            target_message: entry.target_message,
            status: entry.status,
            message: entry.message,
            preserved: entry.preserved,
        }
    }

    pub fn is_for(&self, key: &SourceKey) -> bool {
        self.source_channel == key.source_channel && self.source_message == key.source_message
    }
}

/// Result of an explicit delete command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub success: bool,
    pub success_count: usize,
    pub total_count: usize,
    pub partial_failure: bool,
    /// Posts still live after this attempt; a retry touches only these.
    #[serde(default)]
    pub remaining_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DeleteOutcome {
    pub const NOT_FOUND_REASON: &'static str = "not found in forwarding history";
    pub const ALL_FAILED_REASON: &'static str = "Failed to delete from all channels";

    pub fn not_found() -> Self {
        Self {
            success: false,
            success_count: 0,
            total_count: 0,
            partial_failure: false,
            remaining_count: 0,
            reason: Some(Self::NOT_FOUND_REASON.to_string()),
        }
    }

    /// `remaining` counts every post still live afterwards, the source post
    /// included.
    pub fn from_counts(success_count: usize, total_count: usize, remaining: usize) -> Self {
        let success = success_count > 0;
        Self {
            success,
            success_count,
            total_count,
            partial_failure: success && remaining > 0,
            remaining_count: remaining,
            reason: (!success).then(|| Self::ALL_FAILED_REASON.to_string()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.reason.as_deref() == Some(Self::NOT_FOUND_REASON)
    }
}

/// Trims entries, drops blanks and duplicates, keeps first-seen order.
pub fn normalize_target_channels<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(raw.len());
    for channel in raw {
        let channel = channel.as_ref().trim();
        if channel.is_empty() || normalized.iter().any(|existing| existing == channel) {
            continue;
        }
        normalized.push(channel.to_string());
    }
    normalized
}

/// Pads (or truncates) a channel list to exactly [`MAX_TARGET_CHANNELS`] slots.
pub fn pad_target_slots(channels: &[String]) -> Vec<String> {
    let mut slots: Vec<String> = channels
        .iter()
        .take(MAX_TARGET_CHANNELS)
        .cloned()
        .collect();
    slots.resize(MAX_TARGET_CHANNELS, String::new());
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn unit_normalize_target_channels_filters_blanks_and_duplicates() {
        let raw = vec![" -100a ", "", "-100b", "-100a", "   ", "-100c"];
        assert_eq!(
            normalize_target_channels(&raw),
            vec!["-100a".to_string(), "-100b".to_string(), "-100c".to_string()]
        );
    }

    #[test]
    fn unit_pad_target_slots_always_yields_five_slots() {
        let padded = pad_target_slots(&["a".to_string()]);
        assert_eq!(padded, vec!["a", "", "", "", ""]);

        let many: Vec<String> = (0..7).map(|index| format!("c{index}")).collect();
        assert_eq!(pad_target_slots(&many).len(), MAX_TARGET_CHANNELS);
    }

    #[test]
    fn unit_uptime_is_zero_when_not_running() {
        let now = Utc::now();
        let mut status = RunStatus::stopped(now - Duration::seconds(90));
        assert_eq!(status.uptime_secs(now), 0);

        status.is_running = true;
        assert_eq!(status.uptime_secs(now), 90);
    }

    #[test]
    fn unit_delete_outcome_flags_partial_failure_only_on_success() {
        let partial = DeleteOutcome::from_counts(2, 4, 1);
        assert!(partial.success);
        assert!(partial.partial_failure);
        assert_eq!(partial.reason, None);

        let failed = DeleteOutcome::from_counts(0, 3, 2);
        assert!(!failed.success);
        assert!(!failed.partial_failure);
        assert_eq!(
            failed.reason.as_deref(),
            Some(DeleteOutcome::ALL_FAILED_REASON)
        );

        assert!(DeleteOutcome::not_found().is_not_found());
    }

    #[test]
    fn unit_preserved_text_prefers_text_over_caption() {
        let payload = PostPayload {
            text: None,
            caption: Some("caption".to_string()),
            photo: Some(MediaRef {
                file_id: "f-1".to_string(),
            }),
        };
        assert_eq!(payload.preserved_text(), "caption");
        assert!(payload.has_photo());
    }

    #[test]
    fn regression_log_labels_reject_unknown_values() {
        assert_eq!(LogKind::parse("forward"), Ok(LogKind::Forward));
        assert!(LogKind::parse("warn").is_err());
        assert_eq!(LogStatus::parse("stopped"), Ok(LogStatus::Stopped));
        assert_eq!(LogStatus::parse("warning"), Ok(LogStatus::Warning));
        assert!(LogStatus::parse("ok").is_err());
    }

    #[test]
    fn unit_forward_record_tracks_source_deletion_in_its_encoding() {
        let record = ForwardRecord::new(vec![TargetCopy::new("-100a", 11)]);
        let encoded = serde_json::to_value(&record).expect("encode");
        assert_eq!(
            encoded,
            serde_json::json!({
                "copies": [{ "target_channel": "-100a", "target_message": 11 }],
                "source_deleted": false
            })
        );
        assert_eq!(record.representative().map(|copy| copy.target_message), Some(11));
        assert_eq!(record.copy_in("-100a").map(|copy| copy.target_message), Some(11));
        assert_eq!(record.pending_deletes(), 2);

        let decoded: ForwardRecord =
            serde_json::from_value(serde_json::json!({ "copies": [] })).expect("decode");
        assert!(!decoded.is_source_deleted());
        assert!(!decoded.is_settled());
        assert_eq!(decoded.pending_deletes(), 1);

        let settled = ForwardRecord::new(Vec::new()).with_source_deleted(true);
        assert!(settled.is_settled());
        assert_eq!(settled.pending_deletes(), 0);
    }

    #[test]
    fn regression_delete_outcome_reports_what_is_left_to_retry() {
        let outcome = DeleteOutcome::from_counts(2, 4, 1);
        assert_eq!(outcome.remaining_count, 1);
        assert_eq!(DeleteOutcome::from_counts(3, 3, 0).remaining_count, 0);
    }
}
