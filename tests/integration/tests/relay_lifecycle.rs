use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use fanout_engine::{FanoutEngine, FanoutSummary};
use fanout_store::{InMemoryRelayStore, RelayStore, SqliteRelayStore};
use fanout_transport::{PostTransport, TransportFailure, TransportFailureKind, TransportResult};
use fanout_types::{
    EditContent, FormattedText, LogKind, LogStatus, MediaRef, MessageId, NewPost, PostEdit,
    PostPayload, SourceKey,
};
use tokio::sync::Mutex as AsyncMutex;

const SOURCE: &str = "-1000";
const TARGETS: [&str; 3] = ["-1001", "-1002", "-1003"];

#[derive(Debug, Clone, PartialEq)]
struct Posted {
    body: String,
    reply_to: Option<MessageId>,
}

/// In-process stand-in for the messaging platform: every channel holds the
/// posts currently visible in it.
#[derive(Default)]
struct SimulatedPlatform {
    channels: AsyncMutex<BTreeMap<String, BTreeMap<MessageId, Posted>>>,
    offline: AsyncMutex<HashSet<String>>,
}

impl SimulatedPlatform {
    async fn publish_source(&self, message: MessageId, body: &str) {
        self.channels
            .lock()
            .await
            .entry(SOURCE.to_string())
            .or_default()
            .insert(
                message,
                Posted {
                    body: body.to_string(),
                    reply_to: None,
                },
            );
    }

    async fn take_offline(&self, channel: &str) {
        self.offline.lock().await.insert(channel.to_string());
    }

    async fn bring_online(&self, channel: &str) {
        self.offline.lock().await.remove(channel);
    }

    async fn ensure_online(&self, channel: &str) -> TransportResult<()> {
        if self.offline.lock().await.contains(channel) {
            return Err(TransportFailure::new(
                TransportFailureKind::Network,
                format!("{channel} unreachable"),
            ));
        }
        Ok(())
    }

    async fn visible(&self, channel: &str) -> BTreeMap<MessageId, Posted> {
        self.channels
            .lock()
            .await
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    async fn replace_body(
        &self,
        channel: &str,
        message: MessageId,
        body: &str,
    ) -> TransportResult<()> {
        self.ensure_online(channel).await?;
        let mut channels = self.channels.lock().await;
        let post = channels
            .get_mut(channel)
            .and_then(|posts| posts.get_mut(&message))
            .ok_or_else(|| {
                TransportFailure::rejected("400: Bad Request: message to edit not found")
            })?;
        post.body = body.to_string();
        Ok(())
    }
}

#[async_trait]
impl PostTransport for SimulatedPlatform {
    async fn copy_post(
        &self,
        target_channel: &str,
        source_channel: &str,
        source_message: MessageId,
        reply_anchor: Option<MessageId>,
    ) -> TransportResult<MessageId> {
        self.ensure_online(target_channel).await?;
        let mut channels = self.channels.lock().await;
        let body = channels
            .get(source_channel)
            .and_then(|posts| posts.get(&source_message))
            .map(|post| post.body.clone())
            .ok_or_else(|| {
                TransportFailure::rejected("400: Bad Request: message to copy not found")
            })?;
        let posts = channels.entry(target_channel.to_string()).or_default();
        let next_id = posts.keys().next_back().copied().unwrap_or(0) + 1;
        posts.insert(
            next_id,
            Posted {
                body,
                reply_to: reply_anchor,
            },
        );
        Ok(next_id)
    }

    async fn edit_post_text(
        &self,
        channel: &str,
        message: MessageId,
        text: &FormattedText,
    ) -> TransportResult<()> {
        self.replace_body(channel, message, &text.text).await
    }

    async fn edit_post_caption(
        &self,
        channel: &str,
        message: MessageId,
        caption: &FormattedText,
    ) -> TransportResult<()> {
        self.replace_body(channel, message, &caption.text).await
    }

    async fn delete_post(&self, channel: &str, message: MessageId) -> TransportResult<()> {
        self.ensure_online(channel).await?;
        let removed = self
            .channels
            .lock()
            .await
            .get_mut(channel)
            .and_then(|posts| posts.remove(&message));
        match removed {
            Some(_) => Ok(()),
            None => Err(TransportFailure::rejected(
                "400: Bad Request: message to delete not found",
            )),
        }
    }

    async fn fetch_media_url(&self, media: &MediaRef) -> TransportResult<String> {
        Ok(format!("https://files.test/{}", media.file_id))
    }
}

struct Relay {
    platform: Arc<SimulatedPlatform>,
    engine: FanoutEngine,
}

impl Relay {
    async fn new(store: Arc<dyn RelayStore>) -> Self {
        let platform = Arc::new(SimulatedPlatform::default());
        let engine = FanoutEngine::new(store, platform.clone());
        engine.set_targets(&TARGETS).await.expect("targets");
        Self { platform, engine }
    }

    async fn post(
        &self,
        message: MessageId,
        body: &str,
        reply_to: Option<MessageId>,
    ) -> FanoutSummary {
        self.platform.publish_source(message, body).await;
        self.engine
            .handle_new_post(&NewPost {
                key: SourceKey::new(SOURCE, message),
                reply_to,
                payload: PostPayload {
                    text: Some(body.to_string()),
                    ..PostPayload::default()
                },
            })
            .await
            .expect("new post")
    }

    async fn edit(&self, message: MessageId, body: &str) -> FanoutSummary {
        self.platform
            .replace_body(SOURCE, message, body)
            .await
            .expect("source edit");
        self.engine
            .handle_edit(&PostEdit {
                key: SourceKey::new(SOURCE, message),
                content: Some(EditContent::Text(FormattedText::plain(body))),
            })
            .await
            .expect("edit")
    }
}

fn key(message: MessageId) -> SourceKey {
    SourceKey::new(SOURCE, message)
}

#[tokio::test]
async fn integration_post_edit_delete_lifecycle_converges_on_every_channel() {
    let store: Arc<dyn RelayStore> = Arc::new(InMemoryRelayStore::new());
    let relay = Relay::new(store.clone()).await;

    let summary = relay.post(1, "hello", None).await;
    assert_eq!(
        summary,
        FanoutSummary::Completed {
            attempted: 3,
            succeeded: 3
        }
    );
    for target in TARGETS {
        let posts = relay.platform.visible(target).await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[&1].body, "hello");
    }

    relay.edit(1, "hello, edited").await;
    for target in TARGETS {
        assert_eq!(relay.platform.visible(target).await[&1].body, "hello, edited");
    }

    let outcome = relay.engine.handle_delete(&key(1)).await.expect("delete");
    assert!(outcome.success);
    assert!(!outcome.partial_failure);
    assert_eq!(outcome.success_count, 4);
    assert_eq!(outcome.total_count, 4);
    assert!(relay.platform.visible(SOURCE).await.is_empty());
    for target in TARGETS {
        assert!(relay.platform.visible(target).await.is_empty());
    }
    assert!(store.get_mapping(&key(1)).await.expect("mapping").is_none());

    let stats = relay.engine.get_stats().await.expect("stats");
    assert_eq!(stats.counters.forwarded, 1);
    assert_eq!(stats.counters.edited, 1);
    assert_eq!(stats.counters.deleted, 4);
    assert_eq!(stats.counters.errors, 0);
}

#[tokio::test]
async fn integration_reply_chains_anchor_to_copies_in_each_channel() {
    let relay = Relay::new(Arc::new(InMemoryRelayStore::new())).await;
    relay.platform.take_offline("-1003").await;
    relay.post(10, "root", None).await;
    relay.platform.bring_online("-1003").await;

    relay.post(11, "first reply", Some(10)).await;
    relay.post(12, "reply to reply", Some(11)).await;

    let first = relay.platform.visible("-1001").await;
    assert_eq!(first[&2].reply_to, Some(1));
    assert_eq!(first[&3].reply_to, Some(2));

    // The root never reached -1003, so the first reply has no anchor there
    // while the nested reply anchors to the copy that did arrive.
    let third = relay.platform.visible("-1003").await;
    assert_eq!(third.len(), 2);
    assert_eq!(third[&1].reply_to, None);
    assert_eq!(third[&2].reply_to, Some(1));
}

#[tokio::test]
async fn integration_retried_delete_removes_only_remaining_copies() {
    let store: Arc<dyn RelayStore> = Arc::new(InMemoryRelayStore::new());
    let relay = Relay::new(store.clone()).await;
    relay.post(5, "short lived", None).await;

    relay.platform.take_offline("-1002").await;
    let first = relay.engine.handle_delete(&key(5)).await.expect("delete");
    assert!(first.success);
    assert!(first.partial_failure);
    assert_eq!(first.success_count, 3);
    assert_eq!(first.total_count, 4);
    assert_eq!(first.remaining_count, 1);
    let survivors = store
        .get_mapping(&key(5))
        .await
        .expect("mapping")
        .expect("survivor record");
    assert_eq!(survivors.channels().collect::<Vec<_>>(), vec!["-1002"]);

    relay.platform.bring_online("-1002").await;
    let retry = relay.engine.handle_delete(&key(5)).await.expect("retry");
    assert!(retry.success);
    assert!(!retry.partial_failure);
    assert_eq!(retry.success_count, 1);
    assert_eq!(retry.remaining_count, 0);
    assert!(relay.platform.visible("-1002").await.is_empty());
    assert!(store.get_mapping(&key(5)).await.expect("mapping").is_none());

    let again = relay.engine.handle_delete(&key(5)).await.expect("again");
    assert!(again.is_not_found());
}

#[tokio::test]
async fn integration_paused_relay_leaves_targets_untouched() {
    let store: Arc<dyn RelayStore> = Arc::new(InMemoryRelayStore::new());
    let relay = Relay::new(store.clone()).await;
    relay.engine.set_paused(true).await.expect("pause");

    relay.post(20, "while paused", None).await;
    for target in TARGETS {
        assert!(relay.platform.visible(target).await.is_empty());
    }
    assert!(store.get_mapping(&key(20)).await.expect("mapping").is_none());

    relay.engine.set_paused(false).await.expect("resume");
    relay.post(21, "after resume", None).await;
    assert_eq!(relay.platform.visible("-1001").await.len(), 1);

    let messages: Vec<String> = relay
        .engine
        .recent_logs(10)
        .await
        .expect("logs")
        .into_iter()
        .map(|entry| entry.message)
        .collect();
    assert!(messages.iter().any(|message| message == "Forwarding paused"));
    assert!(messages.iter().any(|message| message == "Forwarding resumed"));
}

#[tokio::test]
async fn integration_sqlite_store_keeps_mappings_for_edits_after_restart() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = temp.path().join("relay.sqlite");

    let platform = {
        let store: Arc<dyn RelayStore> = Arc::new(SqliteRelayStore::new(&db).expect("open"));
        let relay = Relay::new(store).await;
        relay.post(30, "persisted", None).await;
        relay.platform
    };

    let reopened: Arc<dyn RelayStore> = Arc::new(SqliteRelayStore::new(&db).expect("reopen"));
    let engine = FanoutEngine::new(reopened.clone(), platform.clone());
    assert_eq!(engine.target_set().await.expect("targets").len(), 3);

    platform
        .replace_body(SOURCE, 30, "edited after restart")
        .await
        .expect("source edit");
    let summary = engine
        .handle_edit(&PostEdit {
            key: key(30),
            content: Some(EditContent::Text(FormattedText::plain(
                "edited after restart",
            ))),
        })
        .await
        .expect("edit");
    assert_eq!(summary.succeeded(), 3);
    for target in TARGETS {
        assert_eq!(
            platform.visible(target).await[&1].body,
            "edited after restart"
        );
    }

    let forwarded = reopened
        .find_log(&key(30), LogKind::Forward)
        .await
        .expect("find")
        .expect("forward log survives reopen");
    assert_eq!(forwarded.status, LogStatus::Success);
    assert_eq!(forwarded.preserved.message_text.as_deref(), Some("persisted"));
}
