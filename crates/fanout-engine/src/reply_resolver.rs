use std::collections::HashMap;

use fanout_store::{RelayStore, StoreResult};
use fanout_types::{MessageId, SourceKey};

/// Per-target reply anchors derived from the parent post's forward record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyAnchors {
    by_channel: HashMap<String, MessageId>,
}

impl ReplyAnchors {
    pub fn anchor_for(&self, target_channel: &str) -> Option<MessageId> {
        self.by_channel.get(target_channel).copied()
    }

    pub fn len(&self) -> usize {
        self.by_channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_channel.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyResolution {
    NotAReply,
    Anchored(ReplyAnchors),
    /// The parent post has no forward record; copies go out unanchored.
    Unmapped { parent: MessageId },
}

impl ReplyResolution {
    pub fn anchor_for(&self, target_channel: &str) -> Option<MessageId> {
        match self {
            Self::Anchored(anchors) => anchors.anchor_for(target_channel),
            Self::NotAReply | Self::Unmapped { .. } => None,
        }
    }
}

/// Looks up the forward record of the post `key` replies to.
pub async fn resolve_reply_anchors(
    store: &dyn RelayStore,
    key: &SourceKey,
    reply_to: Option<MessageId>,
) -> StoreResult<ReplyResolution> {
    let Some(parent) = reply_to else {
        return Ok(ReplyResolution::NotAReply);
    };
    let parent_key = SourceKey::new(key.source_channel.clone(), parent);
    let Some(record) = store.get_mapping(&parent_key).await? else {
        return Ok(ReplyResolution::Unmapped { parent });
    };
    let by_channel = record
        .into_copies()
        .into_iter()
        .map(|copy| (copy.target_channel, copy.target_message))
        .collect();
    Ok(ReplyResolution::Anchored(ReplyAnchors { by_channel }))
}

#[cfg(test)]
mod tests {
    use super::{resolve_reply_anchors, ReplyResolution};
    use fanout_store::{InMemoryRelayStore, RelayStore};
    use fanout_types::{ForwardRecord, SourceKey, TargetCopy};

    #[tokio::test]
    async fn unit_resolves_anchor_per_channel_from_parent_record() {
        let store = InMemoryRelayStore::new();
        store
            .upsert_mapping(
                &SourceKey::new("src", 10),
                ForwardRecord::new(vec![TargetCopy::new("T1", 110)]),
            )
            .await
            .expect("upsert");

        let resolution = resolve_reply_anchors(&store, &SourceKey::new("src", 11), Some(10))
            .await
            .expect("resolve");
        assert_eq!(resolution.anchor_for("T1"), Some(110));
        assert_eq!(resolution.anchor_for("T2"), None);
    }

    #[tokio::test]
    async fn unit_unmapped_parent_and_plain_posts_have_no_anchors() {
        let store = InMemoryRelayStore::new();
        let key = SourceKey::new("src", 11);

        let unmapped = resolve_reply_anchors(&store, &key, Some(4))
            .await
            .expect("resolve");
        assert_eq!(unmapped, ReplyResolution::Unmapped { parent: 4 });

        let plain = resolve_reply_anchors(&store, &key, None)
            .await
            .expect("resolve");
        assert_eq!(plain, ReplyResolution::NotAReply);
    }
}
