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

//! Log records. Logs are written once and never updated.

use crate::error::Result;
use crate::sqlite::{attributes_column, parse_column};
use crate::store::RecordStore;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracekeep_core::{encode_attributes, from_micros, to_micros, Log, LogId, LogSeverity, ProcessId};

const LOG_COLUMNS: &str = "id, process_id, severity, body, timestamp, attributes";

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<Log> {
    let severity: i64 = row.get(2)?;
    Ok(Log {
        id: parse_column(row, 0)?,
        process_id: parse_column(row, 1)?,
        severity: LogSeverity::from_number(severity).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Integer, Box::new(e))
        })?,
        body: row.get(3)?,
        timestamp: from_micros(row.get(4)?),
        attributes: attributes_column(row, 5)?,
    })
}

impl RecordStore {
    /// Stores a log. Writing an id that already exists leaves the stored log
    /// untouched.
    pub fn create_log(&self, log: &Log) -> Result<Log> {
        self.db().write(|conn| {
            conn.execute(
                "INSERT INTO logs (id, process_id, severity, body, timestamp, attributes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    log.id.to_string(),
                    log.process_id.hex(),
                    log.severity.number(),
                    log.body,
                    to_micros(log.timestamp),
                    encode_attributes(&log.attributes),
                ],
            )?;
            Ok(())
        })?;
        tracing::debug!(log_id = %log.id, severity = %log.severity, "Log stored");
        Ok(log.clone())
    }

    pub fn fetch_log(&self, id: &LogId) -> Result<Option<Log>> {
        self.db().read(|conn| {
            let sql = format!("SELECT {} FROM logs WHERE id = ?1", LOG_COLUMNS);
            Ok(conn
                .query_row(&sql, params![id.to_string()], log_from_row)
                .optional()?)
        })
    }

    pub fn fetch_all_logs(&self) -> Result<Vec<Log>> {
        self.db().read(|conn| {
            let sql = format!(
                "SELECT {} FROM logs ORDER BY timestamp ASC, rowid ASC",
                LOG_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], log_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Logs written by other processes, oldest first
    pub fn fetch_logs_excluding_process(
        &self,
        process_id: &ProcessId,
        limit: Option<usize>,
    ) -> Result<Vec<Log>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        self.db().read(|conn| {
            let sql = format!(
                "SELECT {} FROM logs WHERE process_id != ?1
                 ORDER BY timestamp ASC, rowid ASC LIMIT ?2",
                LOG_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![process_id.hex(), limit], log_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Returns the number of logs removed.
    pub fn remove_logs(&self, ids: &[LogId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let removed = self.db().write(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            // Stay well under SQLite's bound parameter limit.
            for chunk in ids.chunks(500) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                removed += tx.execute(
                    &format!("DELETE FROM logs WHERE id IN ({})", placeholders),
                    params_from_iter(chunk.iter()),
                )?;
            }
            tx.commit()?;
            Ok(removed)
        })?;
        tracing::debug!(removed, "Logs removed");
        Ok(removed)
    }

    pub fn remove_all_logs(&self) -> Result<usize> {
        self.db()
            .write(|conn| Ok(conn.execute("DELETE FROM logs", [])?))
    }

    pub fn log_count(&self) -> Result<usize> {
        self.db().read(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM logs", [], |r| r.get(0))?;
            Ok(n as usize)
        })
    }
}
