//! New-post, edit and delete fan-out over the configured target channels.
//!
//! Per-target transport calls run concurrently; their results are folded in
//! target order by the calling task once every attempt has finished, so the
//! mapping has a single writer and the representative id is stable.

use futures_util::future::join_all;

use crate::reply_resolver::{resolve_reply_anchors, ReplyResolution};
use crate::{FanoutEngine, FanoutResult, FanoutSummary, SkipReason};
use fanout_types::{
    CounterKind, DeleteOutcome, EditContent, ForwardRecord, LogKind, LogStatus, MessageId,
    NewLogEntry, NewPost, PostEdit, PostPayload, PreservedContent, SourceKey, TargetCopy,
};

impl FanoutEngine {
    /// Copies a new source post into every target channel and records the
    /// copies that were created.
    pub async fn handle_new_post(&self, post: &NewPost) -> FanoutResult<FanoutSummary> {
        let targets = self.target_set().await?;
        if targets.is_empty() {
            tracing::debug!(source = %post.key, "no target channels configured");
            return Ok(FanoutSummary::Skipped(SkipReason::NoTargets));
        }
        if self.store.is_paused().await? {
            tracing::debug!(source = %post.key, "forwarding paused, dropping new post");
            return Ok(FanoutSummary::Skipped(SkipReason::Paused));
        }

        let _guard = self.key_locks.acquire(&post.key).await;
        let resolution =
            resolve_reply_anchors(self.store.as_ref(), &post.key, post.reply_to).await?;
        if let ReplyResolution::Unmapped { parent } = resolution {
            tracing::warn!(
                source = %post.key,
                parent,
                "reply parent has no forward record; copying without reply anchors"
            );
            self.store
                .append_log(NewLogEntry::new(
                    LogKind::Info,
                    LogStatus::Warning,
                    &post.key,
                    format!(
                        "Reply target #{parent} not found in forwarding history; forwarded without reply link"
                    ),
                ))
                .await?;
        }

        let attempts = targets.iter().map(|target| {
            let anchor = resolution.anchor_for(target);
            async move {
                let result = self
                    .transport
                    .copy_post(
                        target,
                        &post.key.source_channel,
                        post.key.source_message,
                        anchor,
                    )
                    .await;
                (target, result)
            }
        });
        let results = join_all(attempts).await;

        let attempted = results.len();
        let mut copies = Vec::with_capacity(attempted);
        let mut failures = Vec::new();
        for (target, result) in results {
            match result {
                Ok(target_message) => copies.push(TargetCopy::new(target, target_message)),
                Err(failure) => failures.push((target, failure)),
            }
        }

        // Mapping is written before any failure is recorded.
        let succeeded = copies.len();
        let representative = copies.first().map(|copy| copy.target_message);
        if succeeded > 0 {
            self.store
                .upsert_mapping(&post.key, ForwardRecord::new(copies))
                .await?;
            self.store.increment(CounterKind::Forwarded).await?;
        }

        for (target, failure) in failures {
            tracing::warn!(
                source = %post.key,
                channel = target,
                kind = failure.kind.as_str(),
                "copy to target failed: {failure}"
            );
            self.store.increment(CounterKind::Errors).await?;
            self.store
                .append_log(NewLogEntry::error(
                    &post.key,
                    format!("Failed to forward to {target}: {failure}"),
                ))
                .await?;
        }

        if succeeded == 0 {
            tracing::warn!(source = %post.key, attempted, "new post reached no target channel");
            return Ok(FanoutSummary::Completed {
                attempted,
                succeeded,
            });
        }

        let preserved = self.preserve_content(&post.key, &post.payload).await;
        self.store
            .append_log(
                NewLogEntry::new(
                    LogKind::Forward,
                    LogStatus::Success,
                    &post.key,
                    format!("Message forwarded to {succeeded} of {attempted} channels"),
                )
                .with_target(representative)
                .with_preserved(preserved),
            )
            .await?;
        tracing::info!(source = %post.key, succeeded, attempted, "new post forwarded");
        Ok(FanoutSummary::Completed {
            attempted,
            succeeded,
        })
    }

    /// Replays a text or caption edit onto every recorded copy. The forward
    /// record is never modified here.
    pub async fn handle_edit(&self, edit: &PostEdit) -> FanoutResult<FanoutSummary> {
        let Some(content) = edit.content.as_ref() else {
            tracing::debug!(source = %edit.key, "edit carries no text or caption");
            return Ok(FanoutSummary::Skipped(SkipReason::NoContent));
        };

        let _guard = self.key_locks.acquire(&edit.key).await;
        let Some(record) = self.store.get_mapping(&edit.key).await? else {
            tracing::debug!(source = %edit.key, "edited post has no forward record");
            return Ok(FanoutSummary::Skipped(SkipReason::NoMapping));
        };

        let attempts = record.copies().iter().map(|copy| async move {
            let result = match content {
                EditContent::Text(text) => {
                    self.transport
                        .edit_post_text(&copy.target_channel, copy.target_message, text)
                        .await
                }
                EditContent::Caption(caption) => {
                    self.transport
                        .edit_post_caption(&copy.target_channel, copy.target_message, caption)
                        .await
                }
            };
            (copy, result)
        });
        let results = join_all(attempts).await;

        let attempted = results.len();
        let mut representative = None;
        let mut succeeded = 0usize;
        for (copy, result) in results {
            match result {
                Ok(()) => {
                    succeeded += 1;
                    representative.get_or_insert(copy.target_message);
                }
                Err(failure) => {
                    tracing::warn!(
                        source = %edit.key,
                        channel = %copy.target_channel,
                        kind = failure.kind.as_str(),
                        "edit of copy failed: {failure}"
                    );
                    self.store.increment(CounterKind::Errors).await?;
                    self.store
                        .append_log(
                            NewLogEntry::error(
                                &edit.key,
                                format!("Failed to edit in {}: {failure}", copy.target_channel),
                            )
                            .with_target(Some(copy.target_message)),
                        )
                        .await?;
                }
            }
        }

        if succeeded > 0 {
            self.store.increment(CounterKind::Edited).await?;
            self.store
                .append_log(
                    NewLogEntry::new(
                        LogKind::Edit,
                        LogStatus::Success,
                        &edit.key,
                        format!("Edit synchronized in {succeeded} of {attempted} channels"),
                    )
                    .with_target(representative),
                )
                .await?;
            tracing::info!(source = %edit.key, succeeded, attempted, "edit synchronized");
        }
        Ok(FanoutSummary::Completed {
            attempted,
            succeeded,
        })
    }

    /// Deletes the source post and every recorded copy. Whatever could not be
    /// deleted, the source post included, stays in the record so a repeat
    /// only retries those.
    pub async fn handle_delete(&self, key: &SourceKey) -> FanoutResult<DeleteOutcome> {
        let _guard = self.key_locks.acquire(key).await;
        let Some(record) = self.store.get_mapping(key).await? else {
            tracing::warn!(source = %key, "delete requested for untracked post");
            self.store.increment(CounterKind::Errors).await?;
            self.store
                .append_log(NewLogEntry::error(
                    key,
                    format!(
                        "Delete command failed: message #{} {}",
                        key.source_message,
                        DeleteOutcome::NOT_FOUND_REASON
                    ),
                ))
                .await?;
            return Ok(DeleteOutcome::not_found());
        };

        let total_count = self.target_set().await?.delete_total(&record);

        let source_result = if record.is_source_deleted() {
            None
        } else {
            Some(
                self.transport
                    .delete_post(&key.source_channel, key.source_message)
                    .await,
            )
        };

        let attempts = record.copies().iter().map(|copy| async move {
            let result = self
                .transport
                .delete_post(&copy.target_channel, copy.target_message)
                .await;
            (copy, result)
        });
        let results = join_all(attempts).await;

        let mut success_count = 0usize;
        let mut last_deleted: Option<MessageId> = None;
        let mut source_deleted = record.is_source_deleted();
        let mut source_failure = None;
        match source_result {
            Some(Ok(())) => {
                success_count += 1;
                last_deleted = Some(key.source_message);
                source_deleted = true;
            }
            Some(Err(failure)) => source_failure = Some(failure),
            None => {}
        }

        let mut survivors = Vec::new();
        let mut copy_failures = Vec::new();
        for (copy, result) in results {
            match result {
                Ok(()) => {
                    success_count += 1;
                    last_deleted = Some(copy.target_message);
                }
                Err(failure) => {
                    survivors.push(copy.clone());
                    copy_failures.push((copy, failure));
                }
            }
        }

        let remaining = ForwardRecord::new(survivors).with_source_deleted(source_deleted);
        let remaining_count = remaining.pending_deletes();
        if remaining.is_settled() {
            self.store.delete_mapping(key).await?;
        } else if remaining_count != record.pending_deletes() {
            self.store.upsert_mapping(key, remaining).await?;
        }

        for _ in 0..success_count {
            self.store.increment(CounterKind::Deleted).await?;
        }
        if let Some(failure) = source_failure {
            tracing::warn!(source = %key, "source post delete failed: {failure}");
            self.store.increment(CounterKind::Errors).await?;
            self.store
                .append_log(NewLogEntry::error(
                    key,
                    format!("Failed to delete from source channel: {failure}"),
                ))
                .await?;
        }
        for (copy, failure) in copy_failures {
            tracing::warn!(
                source = %key,
                channel = %copy.target_channel,
                "copy delete failed: {failure}"
            );
            self.store.increment(CounterKind::Errors).await?;
            self.store
                .append_log(
                    NewLogEntry::error(
                        key,
                        format!(
                            "Failed to delete from target {}: {failure}",
                            copy.target_channel
                        ),
                    )
                    .with_target(Some(copy.target_message)),
                )
                .await?;
        }

        let outcome = DeleteOutcome::from_counts(success_count, total_count, remaining_count);
        let preserved = self
            .store
            .find_log(key, LogKind::Forward)
            .await?
            .map(|log| log.preserved)
            .unwrap_or_default();
        let status = if outcome.success {
            LogStatus::Success
        } else {
            LogStatus::Failed
        };
        self.store
            .append_log(
                NewLogEntry::new(
                    LogKind::Delete,
                    status,
                    key,
                    format!(
                        "Message deleted from {success_count} of {total_count} channels (source + targets)"
                    ),
                )
                .with_target(last_deleted)
                .with_preserved(preserved),
            )
            .await?;
        tracing::info!(
            source = %key,
            success_count,
            total_count,
            remaining = remaining_count,
            "delete propagated"
        );
        Ok(outcome)
    }

    async fn preserve_content(&self, key: &SourceKey, payload: &PostPayload) -> PreservedContent {
        let text = payload.preserved_text();
        let photo_url = match payload.photo.as_ref() {
            Some(photo) => match self.transport.fetch_media_url(photo).await {
                Ok(url) => Some(url),
                Err(failure) => {
                    tracing::warn!(source = %key, "could not resolve photo url: {failure}");
                    None
                }
            },
            None => None,
        };
        PreservedContent {
            message_text: (!text.is_empty()).then_some(text),
            has_photo: payload.has_photo(),
            photo_url,
        }
    }
}
