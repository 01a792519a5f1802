use crate::model::{bytes_to_mb, HistoryRecord, MemorySnapshot};
use rusqlite::{params, Connection, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

const SCHEMA: &str = "\
PRAGMA journal_mode = WAL;
CREATE TABLE IF NOT EXISTS system_snapshot (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    total_ram BIGINT,
    used_ram  BIGINT,
    free_ram  BIGINT,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_system_snapshot_timestamp ON system_snapshot(timestamp);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to prepare store directory {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Append-only snapshot history in a SQLite file.
///
/// Every operation opens its own connection and closes it before returning, so
/// the pollers and any number of bridge workers can share one store without a
/// lock. Faults are logged here and never reach the caller; the `try_*`
/// variants expose them for maintenance paths and tests.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let store = Self { path };
        let conn = store.connect()?;
        conn.execute_batch(SCHEMA)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs blocking store work off the async runtime. `None` only when the
    /// closure panicked.
    pub async fn with_blocking<T, F>(&self, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&SnapshotStore) -> T + Send + 'static,
    {
        let store = self.clone();
        match tokio::task::spawn_blocking(move || f(&store)).await {
            Ok(value) => Some(value),
            Err(err) => {
                error!(error = %err, "store task failed");
                None
            }
        }
    }

    pub fn save(&self, snapshot: &MemorySnapshot) {
        match self.try_save(snapshot) {
            Ok(id) => debug!(id, "snapshot saved"),
            Err(err) => warn!(error = %err, op = "save", "snapshot store fault"),
        }
    }

    pub fn try_save(&self, snapshot: &MemorySnapshot) -> Result<i64, StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO system_snapshot (total_ram, used_ram, free_ram) VALUES (?1, ?2, ?3)",
            params![
                to_sql_int(snapshot.total_bytes),
                to_sql_int(snapshot.used_bytes),
                to_sql_int(snapshot.free_bytes),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest `limit` records, returned oldest first.
    pub fn query_recent(&self, limit: u32) -> Vec<HistoryRecord> {
        self.try_query_recent(limit).unwrap_or_else(|err| {
            warn!(error = %err, op = "query_recent", "snapshot store fault");
            Vec::new()
        })
    }

    pub fn try_query_recent(&self, limit: u32) -> Result<Vec<HistoryRecord>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, total_ram, used_ram, free_ram, timestamp
             FROM system_snapshot
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let mut records = stmt
            .query_map([limit], history_row)?
            .collect::<Result<Vec<_>, _>>()?;
        records.reverse();
        Ok(records)
    }

    pub fn query_within_last_minutes(&self, minutes: u32) -> Vec<HistoryRecord> {
        self.try_query_within_last_minutes(minutes)
            .unwrap_or_else(|err| {
                warn!(error = %err, op = "query_within_last_minutes", "snapshot store fault");
                Vec::new()
            })
    }

    pub fn try_query_within_last_minutes(
        &self,
        minutes: u32,
    ) -> Result<Vec<HistoryRecord>, StoreError> {
        if minutes == 0 {
            return Ok(Vec::new());
        }
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, total_ram, used_ram, free_ram, timestamp
             FROM system_snapshot
             WHERE timestamp >= datetime('now', ?1)
             ORDER BY id ASC",
        )?;
        let modifier = format!("-{minutes} minutes");
        let records = stmt
            .query_map([modifier], history_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count(&self) -> u32 {
        self.try_count().unwrap_or_else(|err| {
            warn!(error = %err, op = "count", "snapshot store fault");
            0
        })
    }

    pub fn try_count(&self) -> Result<u32, StoreError> {
        let conn = self.connect()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM system_snapshot", [], |row| row.get(0))?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Size of the main database file; 0 when it cannot be read.
    pub fn storage_size_kb(&self) -> u64 {
        fs::metadata(&self.path)
            .map(|meta| meta.len() / 1024)
            .unwrap_or(0)
    }

    /// Deletes rows older than `retention`. Returns the number removed.
    pub fn prune_older_than(&self, retention: Duration) -> usize {
        self.try_prune_older_than(retention).unwrap_or_else(|err| {
            warn!(error = %err, op = "prune", "snapshot store fault");
            0
        })
    }

    pub fn try_prune_older_than(&self, retention: Duration) -> Result<usize, StoreError> {
        let conn = self.connect()?;
        let modifier = format!("-{} seconds", retention.as_secs());
        let removed = conn.execute(
            "DELETE FROM system_snapshot WHERE timestamp < datetime('now', ?1)",
            [modifier],
        )?;
        Ok(removed)
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

fn history_row(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let total: i64 = row.get(1)?;
    let used: i64 = row.get(2)?;
    let free: i64 = row.get(3)?;
    let timestamp: Option<String> = row.get(4)?;
    Ok(HistoryRecord {
        id: row.get(0)?,
        total_ram_mb: bytes_to_mb(from_sql_int(total)),
        used_ram_mb: bytes_to_mb(from_sql_int(used)),
        free_ram_mb: bytes_to_mb(from_sql_int(free)),
        timestamp: timestamp.unwrap_or_else(|| "N/A".to_string()),
    })
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
