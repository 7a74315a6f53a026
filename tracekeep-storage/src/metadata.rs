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

//! Metadata records with per-type quotas
//!
//! A new row of type `T` scoped to lifespan id `L` is rejected once the
//! rows matching `type = T AND (lifespan = permanent OR lifespan_id = L)`
//! reach the limit for `T`. Required resources bypass the quota and are
//! never removed by the bulk removal helpers.

use crate::error::Result;
use crate::sessions::optional_session;
use crate::sqlite::parse_column;
use crate::store::RecordStore;
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracekeep_core::{
    from_micros, to_micros, MetadataLifespan, MetadataRecord, MetadataType, ProcessId, SessionId,
};

const METADATA_COLUMNS: &str = "key, value, type, lifespan, lifespan_id, collected_at";

const RESOURCE_TYPES: &[MetadataType] = &[MetadataType::Resource, MetadataType::RequiredResource];

fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<MetadataRecord> {
    Ok(MetadataRecord {
        key: row.get(0)?,
        value: row.get(1)?,
        kind: parse_column(row, 2)?,
        lifespan: parse_column(row, 3)?,
        lifespan_id: row.get(4)?,
        collected_at: from_micros(row.get(5)?),
    })
}

fn load_metadata(
    conn: &Connection,
    key: &str,
    kind: MetadataType,
    lifespan: MetadataLifespan,
    lifespan_id: &str,
) -> Result<Option<MetadataRecord>> {
    let sql = format!(
        "SELECT {} FROM metadata
         WHERE key = ?1 AND type = ?2 AND lifespan = ?3 AND lifespan_id = ?4",
        METADATA_COLUMNS
    );
    Ok(conn
        .query_row(
            &sql,
            params![key, kind.as_str(), lifespan.as_str(), lifespan_id],
            metadata_from_row,
        )
        .optional()?)
}

/// Rows of the given types visible to a session of `process_id`.
fn query_scoped(
    conn: &Connection,
    types: &[MetadataType],
    session_id: Option<&SessionId>,
    process_id: Option<&ProcessId>,
) -> Result<Vec<MetadataRecord>> {
    let type_list = types
        .iter()
        .map(|t| format!("'{}'", t.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM metadata
         WHERE type IN ({})
           AND ((lifespan = 'session' AND lifespan_id = ?1)
             OR (lifespan = 'process' AND lifespan_id = ?2)
             OR lifespan = 'permanent')
         ORDER BY collected_at ASC, rowid ASC",
        METADATA_COLUMNS, type_list
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            session_id.map(|s| s.to_string()),
            process_id.map(|p| p.hex())
        ],
        metadata_from_row,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn query_types(conn: &Connection, types: &[MetadataType]) -> Result<Vec<MetadataRecord>> {
    let placeholders = vec!["?"; types.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM metadata WHERE type IN ({}) ORDER BY collected_at ASC, rowid ASC",
        METADATA_COLUMNS, placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params_from_iter(types.iter().map(|t| t.as_str())),
        metadata_from_row,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

impl RecordStore {
    fn metadata_limit(&self, kind: MetadataType) -> Option<usize> {
        let limits = self.limits();
        match kind {
            MetadataType::Resource => Some(limits.resources_limit),
            MetadataType::CustomProperty => Some(limits.custom_properties_limit),
            MetadataType::PersonaTag => Some(limits.persona_tags_limit),
            MetadataType::RequiredResource => None,
        }
    }

    /// Adds or replaces a metadata row.
    ///
    /// Returns `None` when a new row would exceed the quota for its type.
    /// Replacing the value of an existing row is never limited.
    pub fn add_metadata(&self, record: &MetadataRecord) -> Result<Option<MetadataRecord>> {
        let limit = self.metadata_limit(record.kind);
        let stored = self.db().write(|conn| {
            let tx = conn.transaction()?;
            let existing = load_metadata(
                &tx,
                &record.key,
                record.kind,
                record.lifespan,
                &record.lifespan_id,
            )?;

            if existing.is_none() {
                if let Some(limit) = limit {
                    let count: i64 = tx.query_row(
                        "SELECT COUNT(*) FROM metadata
                         WHERE type = ?1 AND (lifespan = 'permanent' OR lifespan_id = ?2)",
                        params![record.kind.as_str(), record.lifespan_id],
                        |row| row.get(0),
                    )?;
                    if count as usize >= limit {
                        tracing::warn!(
                            key = %record.key,
                            kind = %record.kind,
                            limit,
                            "Metadata limit reached, rejecting"
                        );
                        return Ok(None);
                    }
                }
            }

            tx.execute(
                "INSERT INTO metadata (key, value, type, lifespan, lifespan_id, collected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(key, type, lifespan, lifespan_id) DO UPDATE SET
                    value = excluded.value,
                    collected_at = excluded.collected_at",
                params![
                    record.key,
                    record.value,
                    record.kind.as_str(),
                    record.lifespan.as_str(),
                    record.lifespan_id,
                    to_micros(record.collected_at),
                ],
            )?;
            tx.commit()?;
            Ok(Some(record.clone()))
        })?;
        if stored.is_some() {
            tracing::debug!(key = %record.key, kind = %record.kind, "Metadata stored");
        }
        Ok(stored)
    }

    /// Replaces the value of an existing row. Returns `false` if no row matched.
    pub fn update_metadata(
        &self,
        key: &str,
        value: &str,
        kind: MetadataType,
        lifespan: MetadataLifespan,
        lifespan_id: &str,
    ) -> Result<bool> {
        let now = to_micros(Utc::now());
        let updated = self.db().write(|conn| {
            Ok(conn.execute(
                "UPDATE metadata SET value = ?5, collected_at = ?6
                 WHERE key = ?1 AND type = ?2 AND lifespan = ?3 AND lifespan_id = ?4",
                params![key, kind.as_str(), lifespan.as_str(), lifespan_id, value, now],
            )?)
        })?;
        Ok(updated > 0)
    }

    pub fn remove_metadata(
        &self,
        key: &str,
        kind: MetadataType,
        lifespan: MetadataLifespan,
        lifespan_id: &str,
    ) -> Result<bool> {
        let removed = self.db().write(|conn| {
            Ok(conn.execute(
                "DELETE FROM metadata
                 WHERE key = ?1 AND type = ?2 AND lifespan = ?3 AND lifespan_id = ?4",
                params![key, kind.as_str(), lifespan.as_str(), lifespan_id],
            )?)
        })?;
        Ok(removed > 0)
    }

    /// Removes every row of `kind` in the given lifespans. Required resources
    /// are never removed.
    pub fn remove_all_metadata(
        &self,
        kind: MetadataType,
        lifespans: &[MetadataLifespan],
    ) -> Result<usize> {
        if kind == MetadataType::RequiredResource || lifespans.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; lifespans.len()].join(", ");
        let sql = format!(
            "DELETE FROM metadata WHERE type = ? AND lifespan IN ({})",
            placeholders
        );
        let values: Vec<&str> = std::iter::once(kind.as_str())
            .chain(lifespans.iter().map(|l| l.as_str()))
            .collect();
        let removed = self
            .db()
            .write(|conn| Ok(conn.execute(&sql, params_from_iter(values.iter()))?))?;
        tracing::debug!(kind = %kind, removed, "Removed metadata");
        Ok(removed)
    }

    /// Removes rows with any of `keys` in `lifespan`, except required resources.
    pub fn remove_all_metadata_keys(&self, keys: &[&str], lifespan: MetadataLifespan) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "DELETE FROM metadata
             WHERE type != 'requiredResource' AND lifespan = ? AND key IN ({})",
            placeholders
        );
        let values: Vec<&str> = std::iter::once(lifespan.as_str())
            .chain(keys.iter().copied())
            .collect();
        self.db()
            .write(|conn| Ok(conn.execute(&sql, params_from_iter(values.iter()))?))
    }

    pub fn fetch_metadata(
        &self,
        key: &str,
        kind: MetadataType,
        lifespan: MetadataLifespan,
        lifespan_id: &str,
    ) -> Result<Option<MetadataRecord>> {
        self.db()
            .read(|conn| load_metadata(conn, key, kind, lifespan, lifespan_id))
    }

    pub fn fetch_required_permanent_resource(&self, key: &str) -> Result<Option<MetadataRecord>> {
        self.fetch_metadata(
            key,
            MetadataType::RequiredResource,
            MetadataLifespan::Permanent,
            "",
        )
    }

    /// Resources and required resources of every lifespan
    pub fn fetch_all_resources(&self) -> Result<Vec<MetadataRecord>> {
        self.db().read(|conn| query_types(conn, RESOURCE_TYPES))
    }

    /// Resources visible to a session: its own, its process's and permanent
    /// ones. An unknown session yields an empty list.
    pub fn fetch_resources_for_session_id(&self, id: &SessionId) -> Result<Vec<MetadataRecord>> {
        self.fetch_for_session(RESOURCE_TYPES, id)
    }

    pub fn fetch_resources_for_process_id(&self, id: &ProcessId) -> Result<Vec<MetadataRecord>> {
        self.db()
            .read(|conn| query_scoped(conn, RESOURCE_TYPES, None, Some(id)))
    }

    pub fn fetch_all_custom_properties(&self) -> Result<Vec<MetadataRecord>> {
        self.db()
            .read(|conn| query_types(conn, &[MetadataType::CustomProperty]))
    }

    /// Custom properties visible to a session. An unknown session yields an
    /// empty list.
    pub fn fetch_custom_properties_for_session_id(
        &self,
        id: &SessionId,
    ) -> Result<Vec<MetadataRecord>> {
        self.fetch_for_session(&[MetadataType::CustomProperty], id)
    }

    /// Persona tags visible to a session. An unknown session yields an empty
    /// list.
    pub fn fetch_persona_tags_for_session_id(&self, id: &SessionId) -> Result<Vec<MetadataRecord>> {
        self.fetch_for_session(&[MetadataType::PersonaTag], id)
    }

    fn fetch_for_session(
        &self,
        types: &[MetadataType],
        id: &SessionId,
    ) -> Result<Vec<MetadataRecord>> {
        self.db().read(|conn| match optional_session(conn, id)? {
            Some((session_id, process_id)) => {
                query_scoped(conn, types, Some(&session_id), Some(&process_id))
            }
            None => {
                tracing::debug!(session_id = %id, "No session row, returning no metadata");
                Ok(Vec::new())
            }
        })
    }

    /// Deletes session rows of other sessions and process rows of other
    /// processes. Permanent rows are kept.
    pub fn clean_metadata(
        &self,
        current_session: Option<&SessionId>,
        current_process: &ProcessId,
    ) -> Result<usize> {
        let session = current_session.map(|s| s.to_string());
        let removed = self.db().write(|conn| {
            Ok(conn.execute(
                "DELETE FROM metadata
                 WHERE (lifespan = 'session' AND (?1 IS NULL OR lifespan_id != ?1))
                    OR (lifespan = 'process' AND lifespan_id != ?2)",
                params![session, current_process.hex()],
            )?)
        })?;
        if removed > 0 {
            tracing::info!(removed, "Removed stale metadata");
        }
        Ok(removed)
    }

    pub fn metadata_count(&self) -> Result<usize> {
        self.db().read(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM metadata", [], |r| r.get(0))?;
            Ok(n as usize)
        })
    }
}
