//! Forward-mapping synchronization engine.
//!
//! Relays each new source post to every configured target channel, keeps the
//! mapping from source post to target copies, and replays edits and deletes
//! of the source post onto those copies. Per-target transport failures are
//! absorbed into counters and the activity log; only store failures escape
//! a handler.

use std::sync::Arc;

use chrono::Utc;
use fanout_store::{RelayStore, StoreError};
use fanout_transport::PostTransport;
use fanout_types::{LogEntry, LogKind, LogStatus, NewLogEntry, RelayStats};
use thiserror::Error;

mod fanout_executor;
mod keyed_locks;
mod reply_resolver;
mod target_set;

pub use keyed_locks::KeyedLocks;
pub use reply_resolver::{resolve_reply_anchors, ReplyAnchors, ReplyResolution};
pub use target_set::TargetSet;

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("at most {max} target channels are supported, got {count}", max = fanout_types::MAX_TARGET_CHANNELS)]
    TooManyTargets { count: usize },
}

pub type FanoutResult<T> = Result<T, FanoutError>;

/// Why a handler returned without touching any channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Paused,
    NoTargets,
    /// The source post has no forward record.
    NoMapping,
    /// Edit that changes neither text nor caption.
    NoContent,
}

/// Summary of one new-post or edit fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutSummary {
    Skipped(SkipReason),
    Completed { attempted: usize, succeeded: usize },
}

impl FanoutSummary {
    pub fn succeeded(&self) -> usize {
        match self {
            Self::Skipped(_) => 0,
            Self::Completed { succeeded, .. } => *succeeded,
        }
    }
}

/// Owns the store and transport handles for the lifetime of the process.
pub struct FanoutEngine {
    store: Arc<dyn RelayStore>,
    transport: Arc<dyn PostTransport>,
    key_locks: KeyedLocks,
}

impl FanoutEngine {
    pub fn new(store: Arc<dyn RelayStore>, transport: Arc<dyn PostTransport>) -> Self {
        Self {
            store,
            transport,
            key_locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RelayStore> {
        &self.store
    }

    /// Flips the pause gate. Only new posts are gated.
    pub async fn set_paused(&self, paused: bool) -> FanoutResult<()> {
        self.store.set_paused(paused).await?;
        let message = if paused {
            "Forwarding paused"
        } else {
            "Forwarding resumed"
        };
        tracing::info!(paused, "{message}");
        self.store
            .append_log(NewLogEntry::system(
                LogKind::Info,
                LogStatus::Success,
                message,
            ))
            .await?;
        Ok(())
    }

    /// Replaces the configured target channels. Blank and repeated entries
    /// are dropped before the five-channel limit is checked.
    pub async fn set_targets<S: AsRef<str>>(&self, channels: &[S]) -> FanoutResult<TargetSet> {
        let targets = TargetSet::from_update(channels)?;
        self.store
            .set_target_channels(targets.as_slice().to_vec())
            .await?;
        tracing::info!(count = targets.len(), "target channels updated");
        Ok(targets)
    }

    pub async fn target_set(&self) -> FanoutResult<TargetSet> {
        let slots = self.store.target_channels().await?;
        Ok(TargetSet::from_slots(&slots))
    }

    pub async fn get_stats(&self) -> FanoutResult<RelayStats> {
        let status = self.store.run_status().await?;
        let counters = self.store.counters().await?;
        Ok(RelayStats::from_parts(status, counters, Utc::now()))
    }

    pub async fn recent_logs(&self, limit: usize) -> FanoutResult<Vec<LogEntry>> {
        Ok(self.store.recent_logs(limit).await?)
    }
}
