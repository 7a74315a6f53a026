// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Durable cache of payloads waiting for confirmed delivery
//!
//! Entries are keyed by `(id, type)`. The cache is bounded three ways: an
//! optional entry count cap enforced on insert (oldest entries go first),
//! an age sweep and a total size sweep. The age sweep always runs before
//! the size sweep.

use crate::error::{Result, UploadError};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracekeep_core::{from_micros, to_micros, CacheOptions, Clock, CoreError, SystemClock};
use tracekeep_storage::sqlite::parse_column;
use tracekeep_storage::{Database, Migration, Schema, StorageMechanism};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadType {
    /// Finished session with its spans
    Session,
    /// Opaque attachment such as a crash report
    Blob,
    /// Batch of logs
    Log,
}

impl UploadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadType::Session => "session",
            UploadType::Blob => "blob",
            UploadType::Log => "log",
        }
    }
}

impl std::fmt::Display for UploadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UploadType {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, CoreError> {
        match s {
            "session" => Ok(UploadType::Session),
            "blob" => Ok(UploadType::Blob),
            "log" => Ok(UploadType::Log),
            other => Err(CoreError::UnknownValue {
                kind: "upload type",
                value: other.to_string(),
            }),
        }
    }
}

/// A cached payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDataRecord {
    pub id: String,
    pub upload_type: UploadType,
    pub data: Vec<u8>,
    pub attempt_count: u32,
    pub date: DateTime<Utc>,
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS upload_cache (
    id TEXT NOT NULL,
    type TEXT NOT NULL,
    data BLOB NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    date INTEGER NOT NULL,
    PRIMARY KEY (id, type)
);
CREATE INDEX IF NOT EXISTS idx_upload_cache_date ON upload_cache(date);
"#;

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial schema",
    up_sql: "",
}];

pub static UPLOAD_CACHE_SCHEMA: Schema = Schema {
    name: "upload_cache",
    base_sql: SCHEMA_SQL,
    migrations: MIGRATIONS,
};

const RECORD_COLUMNS: &str = "id, type, data, attempt_count, date";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<UploadDataRecord> {
    Ok(UploadDataRecord {
        id: row.get(0)?,
        upload_type: parse_column(row, 1)?,
        data: row.get(2)?,
        attempt_count: row.get(3)?,
        date: from_micros(row.get(4)?),
    })
}

pub struct UploadCache {
    db: Database,
    options: CacheOptions,
    clock: Arc<dyn Clock>,
}

impl UploadCache {
    pub fn open(mechanism: StorageMechanism, options: CacheOptions) -> Result<Self> {
        Self::with_clock(mechanism, options, Arc::new(SystemClock))
    }

    pub fn with_clock(
        mechanism: StorageMechanism,
        options: CacheOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let db = Database::open(mechanism, &UPLOAD_CACHE_SCHEMA, true)?;
        let cache = Self { db, options, clock };
        if cache.options.reset_cache {
            let removed = cache.reset_cache()?;
            tracing::info!(removed, "Upload cache reset on open");
        }
        Ok(cache)
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Caches a payload. Saving an existing `(id, type)` replaces its data
    /// and keeps its attempt count and date.
    pub fn save_upload_data(
        &self,
        id: &str,
        upload_type: UploadType,
        data: &[u8],
    ) -> Result<UploadDataRecord> {
        if id.is_empty() {
            return Err(UploadError::InvalidInput("upload id is empty".into()));
        }
        if data.is_empty() {
            return Err(UploadError::InvalidInput(format!(
                "payload for {} {} is empty",
                upload_type, id
            )));
        }

        let now = to_micros(self.clock.now());
        let cache_limit = self.options.cache_limit;
        let record = self.db.write(|conn| {
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM upload_cache WHERE id = ?1 AND type = ?2)",
                params![id, upload_type.as_str()],
                |row| row.get(0),
            )?;

            if !exists && cache_limit > 0 {
                let count: i64 =
                    tx.query_row("SELECT COUNT(*) FROM upload_cache", [], |row| row.get(0))?;
                let count = count as usize;
                if count >= cache_limit {
                    let evicted = tx.execute(
                        "DELETE FROM upload_cache WHERE rowid IN (
                            SELECT rowid FROM upload_cache ORDER BY date ASC, rowid ASC LIMIT ?1)",
                        params![(count - cache_limit + 1) as i64],
                    )?;
                    tracing::warn!(evicted, limit = cache_limit, "Upload cache full, evicted oldest");
                }
            }

            tx.execute(
                "INSERT INTO upload_cache (id, type, data, attempt_count, date)
                 VALUES (?1, ?2, ?3, 0, ?4)
                 ON CONFLICT(id, type) DO UPDATE SET data = excluded.data",
                params![id, upload_type.as_str(), data, now],
            )?;
            let sql = format!(
                "SELECT {} FROM upload_cache WHERE id = ?1 AND type = ?2",
                RECORD_COLUMNS
            );
            let record = tx.query_row(&sql, params![id, upload_type.as_str()], record_from_row)?;
            tx.commit()?;
            Ok(record)
        })?;
        tracing::debug!(id, upload_type = %upload_type, bytes = data.len(), "Payload cached");
        Ok(record)
    }

    pub fn fetch_upload_data(
        &self,
        id: &str,
        upload_type: UploadType,
    ) -> Result<Option<UploadDataRecord>> {
        Ok(self.db.read(|conn| {
            let sql = format!(
                "SELECT {} FROM upload_cache WHERE id = ?1 AND type = ?2",
                RECORD_COLUMNS
            );
            Ok(conn
                .query_row(&sql, params![id, upload_type.as_str()], record_from_row)
                .optional()?)
        })?)
    }

    /// All cached payloads, oldest first
    pub fn fetch_all_upload_data(&self) -> Result<Vec<UploadDataRecord>> {
        Ok(self.db.read(|conn| {
            let sql = format!(
                "SELECT {} FROM upload_cache ORDER BY date ASC, rowid ASC",
                RECORD_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], record_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?)
    }

    pub fn delete_upload_data(&self, id: &str, upload_type: UploadType) -> Result<bool> {
        let deleted = self.db.write(|conn| {
            Ok(conn.execute(
                "DELETE FROM upload_cache WHERE id = ?1 AND type = ?2",
                params![id, upload_type.as_str()],
            )?)
        })?;
        Ok(deleted > 0)
    }

    pub fn update_attempt_count(
        &self,
        id: &str,
        upload_type: UploadType,
        attempt_count: u32,
    ) -> Result<bool> {
        let updated = self.db.write(|conn| {
            Ok(conn.execute(
                "UPDATE upload_cache SET attempt_count = ?3 WHERE id = ?1 AND type = ?2",
                params![id, upload_type.as_str(), attempt_count],
            )?)
        })?;
        Ok(updated > 0)
    }

    /// Drops entries older than the day limit, then the oldest remaining
    /// entries until the total size fits the size limit. Returns the number
    /// of entries removed.
    pub fn clear_stale_data_if_needed(&self) -> Result<usize> {
        let days = self.options.cache_days_limit;
        let size_limit = self.options.cache_size_limit;
        // A limit reaching before the earliest representable time keeps everything.
        let cutoff = match days {
            0 => None,
            days => Duration::try_days(i64::from(days))
                .and_then(|age| self.clock.now().checked_sub_signed(age))
                .map(to_micros),
        };

        let removed = self.db.write(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;

            if let Some(cutoff) = cutoff {
                removed += tx.execute("DELETE FROM upload_cache WHERE date < ?1", params![cutoff])?;
            }

            if size_limit > 0 {
                let mut stmt = tx.prepare(
                    "SELECT rowid, length(data) FROM upload_cache ORDER BY date ASC, rowid ASC",
                )?;
                let entries = stmt
                    .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                drop(stmt);

                let mut total: u64 = entries.iter().map(|(_, len)| *len as u64).sum();
                for (rowid, len) in entries {
                    if total <= size_limit {
                        break;
                    }
                    removed += tx.execute("DELETE FROM upload_cache WHERE rowid = ?1", params![rowid])?;
                    total -= len as u64;
                }
            }

            tx.commit()?;
            Ok(removed)
        })?;

        if removed > 0 {
            tracing::info!(removed, "Removed stale cached payloads");
        }
        Ok(removed)
    }

    /// Removes every cached payload.
    pub fn reset_cache(&self) -> Result<usize> {
        Ok(self
            .db
            .write(|conn| Ok(conn.execute("DELETE FROM upload_cache", [])?))?)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.db.read(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM upload_cache", [], |r| r.get(0))?;
            Ok(n as usize)
        })?)
    }

    /// Total payload bytes cached
    pub fn total_size(&self) -> Result<u64> {
        Ok(self.db.read(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COALESCE(SUM(length(data)), 0) FROM upload_cache",
                [],
                |r| r.get(0),
            )?;
            Ok(n as u64)
        })?)
    }

    pub fn close(&self) {
        self.db.close();
    }
}
