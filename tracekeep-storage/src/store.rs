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

//! Record store: sessions, spans, logs and metadata in one SQLite database.
//!
//! Operations are split by entity across `sessions`, `spans`, `logs` and
//! `metadata`. Lookups that depend on a missing session return empty
//! results instead of errors.

use crate::error::Result;
use crate::options::StorageOptions;
use crate::schema::RECORD_SCHEMA;
use crate::sqlite::Database;
use serde::Serialize;
use tracekeep_core::StorageLimits;

pub struct RecordStore {
    db: Database,
    options: StorageOptions,
}

/// Row counts per table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub sessions: u64,
    pub spans: u64,
    pub span_events: u64,
    pub span_links: u64,
    pub logs: u64,
    pub metadata: u64,
}

impl RecordStore {
    pub fn open(options: StorageOptions) -> Result<Self> {
        let db = Database::open(
            options.mechanism.clone(),
            &RECORD_SCHEMA,
            options.reset_if_error,
        )?;
        tracing::info!(store = options.mechanism.name(), "Record store opened");
        Ok(Self { db, options })
    }

    /// Private in-memory store with default limits
    pub fn in_memory() -> Result<Self> {
        Self::open(StorageOptions::default())
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn limits(&self) -> &StorageLimits {
        &self.options.limits
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    pub fn close(&self) {
        self.db.close();
    }

    pub fn is_closed(&self) -> bool {
        self.db.is_closed()
    }

    pub fn stats(&self) -> Result<StorageStats> {
        self.db.read(|conn| {
            let count = |table: &str| -> Result<u64> {
                let n: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
                Ok(n as u64)
            };
            Ok(StorageStats {
                sessions: count("sessions")?,
                spans: count("spans")?,
                span_events: count("span_events")?,
                span_links: count("span_links")?,
                logs: count("logs")?,
                metadata: count("metadata")?,
            })
        })
    }
}

impl Drop for RecordStore {
    fn drop(&mut self) {
        self.db.close();
    }
}
