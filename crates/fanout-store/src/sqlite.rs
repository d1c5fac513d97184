//! SQLite-backed `RelayStore` implementation with durable persistence.

use crate::{
    CounterKind, Counters, ForwardRecord, LogEntry, LogKind, NewLogEntry, RelayStore, RunStatus,
    SourceKey, StoreError, StoreResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fanout_types::{pad_target_slots, LogStatus, PreservedContent};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

const TARGET_CHANNELS_CONFIG_KEY: &str = "target_channels";

/// Persistent store backend. The activity log is unbounded here.
#[derive(Debug)]
pub struct SqliteRelayStore {
    db_path: PathBuf,
}

impl SqliteRelayStore {
    /// Opens (or creates) the database at `path` and ensures the schema.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }
}

fn initialize_schema(connection: &Connection) -> StoreResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS relay_logs (
            log_id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            kind TEXT NOT NULL,
            source_channel TEXT NOT NULL,
            source_message INTEGER NOT NULL,
            target_message INTEGER NULL,
            status TEXT NOT NULL,
            message TEXT NOT NULL,
            message_text TEXT NULL,
            has_photo INTEGER NOT NULL DEFAULT 0,
            photo_url TEXT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_relay_logs_source
            ON relay_logs (source_channel, source_message, kind);

        CREATE TABLE IF NOT EXISTS forward_mappings (
            source_channel TEXT NOT NULL,
            source_message INTEGER NOT NULL,
            record_json TEXT NOT NULL,
            PRIMARY KEY (source_channel, source_message)
        );

        CREATE TABLE IF NOT EXISTS relay_config (
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS relay_stats (
            stats_id INTEGER PRIMARY KEY CHECK (stats_id = 1),
            forwarded INTEGER NOT NULL DEFAULT 0,
            edited INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            errors INTEGER NOT NULL DEFAULT 0,
            is_running INTEGER NOT NULL DEFAULT 0,
            is_paused INTEGER NOT NULL DEFAULT 0,
            start_time TEXT NOT NULL
        );
        "#,
    )?;
    connection.execute(
        "INSERT OR IGNORE INTO relay_stats (stats_id, start_time) VALUES (1, ?1)",
        params![timestamp_to_db(Utc::now())],
    )?;
    Ok(())
}

#[async_trait]
impl RelayStore for SqliteRelayStore {
    async fn append_log(&self, entry: NewLogEntry) -> StoreResult<LogEntry> {
        let connection = self.open_connection()?;
        let timestamp = Utc::now();
        connection.execute(
            r#"
            INSERT INTO relay_logs (
                timestamp, kind, source_channel, source_message, target_message,
                status, message, message_text, has_photo, photo_url
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                timestamp_to_db(timestamp),
                entry.kind.as_str(),
                entry.source_channel,
                entry.source_message,
                entry.target_message,
                entry.status.as_str(),
                entry.message,
                entry.preserved.message_text,
                entry.preserved.has_photo,
                entry.preserved.photo_url,
            ],
        )?;
        let id = i64_to_u64("log_id", connection.last_insert_rowid())?;
        Ok(LogEntry::from_new(id, timestamp, entry))
    }

    async fn recent_logs(&self, limit: usize) -> StoreResult<Vec<LogEntry>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT log_id, timestamp, kind, source_channel, source_message, target_message,
                   status, message, message_text, has_photo, photo_url
            FROM relay_logs
            ORDER BY log_id DESC
            LIMIT ?1
            "#,
        )?;
        let rows = statement
            .query_map(params![usize_to_sql_limit(limit)], read_log_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawLogRow::into_entry).collect()
    }

    async fn find_log(&self, key: &SourceKey, kind: LogKind) -> StoreResult<Option<LogEntry>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                r#"
                SELECT log_id, timestamp, kind, source_channel, source_message, target_message,
                       status, message, message_text, has_photo, photo_url
                FROM relay_logs
                WHERE source_channel = ?1 AND source_message = ?2 AND kind = ?3
                ORDER BY log_id DESC
                LIMIT 1
                "#,
                params![key.source_channel, key.source_message, kind.as_str()],
                read_log_row,
            )
            .optional()?;
        row.map(RawLogRow::into_entry).transpose()
    }

    async fn increment(&self, counter: CounterKind) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let column = counter_column(counter);
        connection.execute(
            &format!("UPDATE relay_stats SET {column} = {column} + 1 WHERE stats_id = 1"),
            [],
        )?;
        Ok(())
    }

    async fn counters(&self) -> StoreResult<Counters> {
        let connection = self.open_connection()?;
        let (forwarded, edited, deleted, errors): (i64, i64, i64, i64) = connection.query_row(
            "SELECT forwarded, edited, deleted, errors FROM relay_stats WHERE stats_id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        Ok(Counters {
            forwarded: i64_to_u64("forwarded", forwarded)?,
            edited: i64_to_u64("edited", edited)?,
            deleted: i64_to_u64("deleted", deleted)?,
            errors: i64_to_u64("errors", errors)?,
        })
    }

    async fn run_status(&self) -> StoreResult<RunStatus> {
        let connection = self.open_connection()?;
        let (is_running, is_paused, start_time): (bool, bool, String) = connection.query_row(
            "SELECT is_running, is_paused, start_time FROM relay_stats WHERE stats_id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(RunStatus {
            is_running,
            is_paused,
            start_time: timestamp_from_db(&start_time)?,
        })
    }

    async fn set_running(&self, running: bool) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            "UPDATE relay_stats SET is_running = ?1, start_time = ?2 WHERE stats_id = 1",
            params![running, timestamp_to_db(Utc::now())],
        )?;
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            "UPDATE relay_stats SET is_paused = ?1 WHERE stats_id = 1",
            params![paused],
        )?;
        Ok(())
    }

    async fn target_channels(&self) -> StoreResult<Vec<String>> {
        let connection = self.open_connection()?;
        let raw: Option<String> = connection
            .query_row(
                "SELECT value_json FROM relay_config WHERE key = ?1",
                params![TARGET_CHANNELS_CONFIG_KEY],
                |row| row.get(0),
            )
            .optional()?;
        let channels: Vec<String> = match raw {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        Ok(pad_target_slots(&channels))
    }

    async fn set_target_channels(&self, channels: Vec<String>) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let encoded = serde_json::to_string(&pad_target_slots(&channels))?;
        connection.execute(
            r#"
            INSERT INTO relay_config (key, value_json) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json
            "#,
            params![TARGET_CHANNELS_CONFIG_KEY, encoded],
        )?;
        Ok(())
    }

    async fn get_mapping(&self, key: &SourceKey) -> StoreResult<Option<ForwardRecord>> {
        let connection = self.open_connection()?;
        let raw: Option<String> = connection
            .query_row(
                r#"
                SELECT record_json FROM forward_mappings
                WHERE source_channel = ?1 AND source_message = ?2
                "#,
                params![key.source_channel, key.source_message],
                |row| row.get(0),
            )
            .optional()?;
        let record = raw
            .as_deref()
            .map(serde_json::from_str::<ForwardRecord>)
            .transpose()?;
        Ok(record.filter(|record| !record.is_settled()))
    }

    async fn upsert_mapping(&self, key: &SourceKey, record: ForwardRecord) -> StoreResult<()> {
        if record.is_settled() {
            return self.delete_mapping(key).await;
        }
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO forward_mappings (source_channel, source_message, record_json)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(source_channel, source_message)
                DO UPDATE SET record_json = excluded.record_json
            "#,
            params![
                key.source_channel,
                key.source_message,
                serde_json::to_string(&record)?
            ],
        )?;
        Ok(())
    }

    async fn delete_mapping(&self, key: &SourceKey) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            "DELETE FROM forward_mappings WHERE source_channel = ?1 AND source_message = ?2",
            params![key.source_channel, key.source_message],
        )?;
        Ok(())
    }
}

struct RawLogRow {
    id: i64,
    timestamp: String,
    kind: String,
    source_channel: String,
    source_message: i64,
    target_message: Option<i64>,
    status: String,
    message: String,
    message_text: Option<String>,
    has_photo: bool,
    photo_url: Option<String>,
}

impl RawLogRow {
    fn into_entry(self) -> StoreResult<LogEntry> {
        Ok(LogEntry {
            id: i64_to_u64("log_id", self.id)?,
            timestamp: timestamp_from_db(&self.timestamp)?,
            kind: LogKind::parse(&self.kind).map_err(|error| {
                StoreError::InvalidPersistedValue {
                    field: error.kind,
                    value: error.value,
                }
            })?,
            source_channel: self.source_channel,
            source_message: self.source_message,
            target_message: self.target_message,
            status: LogStatus::parse(&self.status).map_err(|error| {
                StoreError::InvalidPersistedValue {
                    field: error.kind,
                    value: error.value,
                }
            })?,
            message: self.message,
            preserved: PreservedContent {
                message_text: self.message_text,
                has_photo: self.has_photo,
                photo_url: self.photo_url,
            },
        })
    }
}

fn read_log_row(row: &Row<'_>) -> rusqlite::Result<RawLogRow> {
    Ok(RawLogRow {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        kind: row.get(2)?,
        source_channel: row.get(3)?,
        source_message: row.get(4)?,
        target_message: row.get(5)?,
        status: row.get(6)?,
        message: row.get(7)?,
        message_text: row.get(8)?,
        has_photo: row.get(9)?,
        photo_url: row.get(10)?,
    })
}

fn counter_column(counter: CounterKind) -> &'static str {
    match counter {
        CounterKind::Forwarded => "forwarded",
        CounterKind::Edited => "edited",
        CounterKind::Deleted => "deleted",
        CounterKind::Errors => "errors",
    }
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn i64_to_u64(field: &'static str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

fn usize_to_sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
