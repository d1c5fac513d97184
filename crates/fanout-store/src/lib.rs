//! Record store abstractions for the relay plus the in-memory backend.
//!
//! The store owns every piece of process-wide mutable state: the activity
//! log, counters, run/pause flags, the target channel slots and the forward
//! mapping. Each operation touches a single key or counter; nothing here
//! needs a multi-key transaction.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use fanout_types::{
    CounterKind, Counters, ForwardRecord, LogEntry, LogKind, NewLogEntry, RunStatus, SourceKey,
};
pub use sqlite::SqliteRelayStore;

/// Default number of log entries retained by the in-memory backend.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Result type for relay store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Async store contract consumed by the fan-out engine and control surfaces.
#[async_trait]
pub trait RelayStore: Send + Sync {
    async fn append_log(&self, entry: NewLogEntry) -> StoreResult<LogEntry>;
    /// Most recent first, at most `limit` entries.
    async fn recent_logs(&self, limit: usize) -> StoreResult<Vec<LogEntry>>;
    /// Most recent entry of `kind` recorded for `key`.
    async fn find_log(&self, key: &SourceKey, kind: LogKind) -> StoreResult<Option<LogEntry>>;

    async fn increment(&self, counter: CounterKind) -> StoreResult<()>;
    async fn counters(&self) -> StoreResult<Counters>;

    async fn run_status(&self) -> StoreResult<RunStatus>;
    /// Always resets the run start time, whether or not the flag changes.
    async fn set_running(&self, running: bool) -> StoreResult<()>;
    async fn set_paused(&self, paused: bool) -> StoreResult<()>;
    async fn is_paused(&self) -> StoreResult<bool> {
        Ok(self.run_status().await?.is_paused)
    }

    /// Exactly five slots, blank-padded.
    async fn target_channels(&self) -> StoreResult<Vec<String>>;
    async fn set_target_channels(&self, channels: Vec<String>) -> StoreResult<()>;

    async fn get_mapping(&self, key: &SourceKey) -> StoreResult<Option<ForwardRecord>>;
    /// Full replace. Upserting a settled record removes the mapping.
    async fn upsert_mapping(&self, key: &SourceKey, record: ForwardRecord) -> StoreResult<()>;
    async fn delete_mapping(&self, key: &SourceKey) -> StoreResult<()>;
}

/// In-memory implementation with a bounded activity log.
#[derive(Debug)]
pub struct InMemoryRelayStore {
    inner: RwLock<StoreInner>,
    log_capacity: usize,
}

#[derive(Debug)]
struct StoreInner {
    logs: VecDeque<LogEntry>,
    next_log_id: u64,
    counters: Counters,
    status: RunStatus,
    target_slots: Vec<String>,
    mappings: HashMap<SourceKey, ForwardRecord>,
}

impl Default for InMemoryRelayStore {
    fn default() -> Self {
        Self::with_log_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl InMemoryRelayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_capacity(log_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                logs: VecDeque::new(),
                next_log_id: 1,
                counters: Counters::default(),
                status: RunStatus::stopped(Utc::now()),
                target_slots: fanout_types::pad_target_slots(&[]),
                mappings: HashMap::new(),
            }),
            log_capacity: log_capacity.max(1),
        }
    }
}

#[async_trait]
impl RelayStore for InMemoryRelayStore {
    async fn append_log(&self, entry: NewLogEntry) -> StoreResult<LogEntry> {
        let mut inner = self.inner.write().await;
        let id = inner.next_log_id;
        inner.next_log_id = inner.next_log_id.saturating_add(1);
        let log = LogEntry::from_new(id, Utc::now(), entry);
        inner.logs.push_front(log.clone());
        inner.logs.truncate(self.log_capacity);
        Ok(log)
    }

    async fn recent_logs(&self, limit: usize) -> StoreResult<Vec<LogEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.logs.iter().take(limit).cloned().collect())
    }

    async fn find_log(&self, key: &SourceKey, kind: LogKind) -> StoreResult<Option<LogEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .logs
            .iter()
            .find(|log| log.kind == kind && log.is_for(key))
            .cloned())
    }

    async fn increment(&self, counter: CounterKind) -> StoreResult<()> {
        self.inner.write().await.counters.bump(counter);
        Ok(())
    }

    async fn counters(&self) -> StoreResult<Counters> {
        Ok(self.inner.read().await.counters)
    }

    async fn run_status(&self) -> StoreResult<RunStatus> {
        Ok(self.inner.read().await.status)
    }

    async fn set_running(&self, running: bool) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.status.is_running = running;
        inner.status.start_time = Utc::now();
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> StoreResult<()> {
        self.inner.write().await.status.is_paused = paused;
        Ok(())
    }

    async fn target_channels(&self) -> StoreResult<Vec<String>> {
        Ok(self.inner.read().await.target_slots.clone())
    }

    async fn set_target_channels(&self, channels: Vec<String>) -> StoreResult<()> {
        self.inner.write().await.target_slots = fanout_types::pad_target_slots(&channels);
        Ok(())
    }

    async fn get_mapping(&self, key: &SourceKey) -> StoreResult<Option<ForwardRecord>> {
        Ok(self.inner.read().await.mappings.get(key).cloned())
    }

    async fn upsert_mapping(&self, key: &SourceKey, record: ForwardRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if record.is_settled() {
            inner.mappings.remove(key);
        } else {
            inner.mappings.insert(key.clone(), record);
        }
        Ok(())
    }

    async fn delete_mapping(&self, key: &SourceKey) -> StoreResult<()> {
        self.inner.write().await.mappings.remove(key);
        Ok(())
    }
}
