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

//! Session records

use crate::error::Result;
use crate::sqlite::parse_column;
use crate::store::RecordStore;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracekeep_core::{from_micros, to_micros, Session, SessionId};

const SESSION_COLUMNS: &str = "id, process_id, state, trace_id, span_id, start_time, end_time, \
     last_heartbeat_time, crash_report_id, cold_start, clean_exit, app_terminated";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: parse_column(row, 0)?,
        process_id: parse_column(row, 1)?,
        state: parse_column(row, 2)?,
        trace_id: parse_column(row, 3)?,
        span_id: parse_column(row, 4)?,
        start_time: from_micros(row.get(5)?),
        end_time: row.get::<_, Option<i64>>(6)?.map(from_micros),
        last_heartbeat_time: from_micros(row.get(7)?),
        crash_report_id: row.get(8)?,
        cold_start: row.get(9)?,
        clean_exit: row.get(10)?,
        app_terminated: row.get(11)?,
    })
}

pub(crate) fn load_session(conn: &Connection, id: &SessionId) -> Result<Option<Session>> {
    let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
    Ok(conn
        .query_row(&sql, params![id.to_string()], session_from_row)
        .optional()?)
}

impl RecordStore {
    /// Inserts or updates a session. An end time, once stored, is kept.
    pub fn upsert_session(&self, session: &Session) -> Result<Session> {
        let stored = self.db().write(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, process_id, state, trace_id, span_id, start_time, \
                 end_time, last_heartbeat_time, crash_report_id, cold_start, clean_exit, \
                 app_terminated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                    state = excluded.state,
                    end_time = COALESCE(sessions.end_time, excluded.end_time),
                    last_heartbeat_time = excluded.last_heartbeat_time,
                    crash_report_id = excluded.crash_report_id,
                    cold_start = excluded.cold_start,
                    clean_exit = excluded.clean_exit,
                    app_terminated = excluded.app_terminated",
                params![
                    session.id.to_string(),
                    session.process_id.hex(),
                    session.state.as_str(),
                    session.trace_id.to_string(),
                    session.span_id.to_string(),
                    to_micros(session.start_time),
                    session.end_time.map(to_micros),
                    to_micros(session.last_heartbeat_time),
                    session.crash_report_id,
                    session.cold_start,
                    session.clean_exit,
                    session.app_terminated,
                ],
            )?;
            load_session(conn, &session.id)
        })?;
        tracing::debug!(session_id = %session.id, "Session stored");
        Ok(stored.unwrap_or_else(|| session.clone()))
    }

    pub fn fetch_session(&self, id: &SessionId) -> Result<Option<Session>> {
        self.db().read(|conn| load_session(conn, id))
    }

    /// All sessions, oldest first
    pub fn fetch_all_sessions(&self) -> Result<Vec<Session>> {
        self.db().read(|conn| {
            let sql = format!(
                "SELECT {} FROM sessions ORDER BY start_time ASC, rowid ASC",
                SESSION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], session_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Most recently started session, skipping `excluding`
    pub fn fetch_latest_session(&self, excluding: Option<&SessionId>) -> Result<Option<Session>> {
        self.fetch_edge_session(excluding, "DESC")
    }

    /// Earliest started session, skipping `excluding`
    pub fn fetch_oldest_session(&self, excluding: Option<&SessionId>) -> Result<Option<Session>> {
        self.fetch_edge_session(excluding, "ASC")
    }

    fn fetch_edge_session(
        &self,
        excluding: Option<&SessionId>,
        order: &str,
    ) -> Result<Option<Session>> {
        let excluded = excluding.map(|id| id.to_string());
        self.db().read(|conn| {
            let sql = format!(
                "SELECT {} FROM sessions WHERE (?1 IS NULL OR id != ?1) \
                 ORDER BY start_time {order}, rowid {order} LIMIT 1",
                SESSION_COLUMNS,
                order = order
            );
            Ok(conn
                .query_row(&sql, params![excluded], session_from_row)
                .optional()?)
        })
    }

    /// Returns whether a row was deleted.
    pub fn delete_session(&self, id: &SessionId) -> Result<bool> {
        let deleted = self.db().write(|conn| {
            Ok(conn.execute("DELETE FROM sessions WHERE id = ?1", params![id.to_string()])?)
        })?;
        if deleted > 0 {
            tracing::debug!(session_id = %id, "Session deleted");
        }
        Ok(deleted > 0)
    }

    pub fn session_count(&self) -> Result<usize> {
        self.db().read(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?;
            Ok(n as usize)
        })
    }
}

/// Used by metadata lookups that resolve a session's process.
pub(crate) fn optional_session(
    conn: &Connection,
    id: &SessionId,
) -> Result<Option<(SessionId, tracekeep_core::ProcessId)>> {
    let row = conn
        .query_row(
            "SELECT id, process_id FROM sessions WHERE id = ?1",
            params![id.to_string()],
            |row| Ok((parse_column(row, 0)?, parse_column(row, 1)?)),
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tracekeep_core::{ProcessId, SessionState};

    fn session_at(offset_secs: i64) -> Session {
        Session::new(
            SessionId::random(),
            ProcessId::random(),
            SessionState::Foreground,
            Utc::now() + Duration::seconds(offset_secs),
        )
    }

    #[test]
    fn test_upsert_and_fetch() {
        let store = RecordStore::in_memory().unwrap();
        let mut session = session_at(0);
        session.crash_report_id = Some("crash-1".into());
        store.upsert_session(&session).unwrap();

        let fetched = store.fetch_session(&session.id).unwrap().unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(fetched.process_id, session.process_id);
        assert_eq!(fetched.trace_id, session.trace_id);
        assert_eq!(fetched.crash_report_id.as_deref(), Some("crash-1"));
        assert_eq!(
            fetched.start_time.timestamp_micros(),
            session.start_time.timestamp_micros()
        );
    }

    #[test]
    fn test_update_in_place() {
        let store = RecordStore::in_memory().unwrap();
        let mut session = session_at(0);
        store.upsert_session(&session).unwrap();

        session.state = SessionState::Background;
        session.app_terminated = true;
        store.upsert_session(&session).unwrap();

        let fetched = store.fetch_session(&session.id).unwrap().unwrap();
        assert_eq!(fetched.state, SessionState::Background);
        assert!(fetched.app_terminated);
        assert_eq!(store.session_count().unwrap(), 1);
    }

    #[test]
    fn test_end_time_is_kept() {
        let store = RecordStore::in_memory().unwrap();
        let mut session = session_at(0);
        let end = session.start_time + Duration::seconds(10);
        session.end_time = Some(end);
        store.upsert_session(&session).unwrap();

        session.end_time = None;
        let stored = store.upsert_session(&session).unwrap();
        assert_eq!(
            stored.end_time.map(|t| t.timestamp_micros()),
            Some(end.timestamp_micros())
        );
    }

    #[test]
    fn test_latest_and_oldest() {
        let store = RecordStore::in_memory().unwrap();
        let old = session_at(-100);
        let mid = session_at(-50);
        let new = session_at(0);
        for s in [&mid, &new, &old] {
            store.upsert_session(s).unwrap();
        }

        assert_eq!(store.fetch_latest_session(None).unwrap().unwrap().id, new.id);
        assert_eq!(
            store.fetch_latest_session(Some(&new.id)).unwrap().unwrap().id,
            mid.id
        );
        assert_eq!(store.fetch_oldest_session(None).unwrap().unwrap().id, old.id);
        assert_eq!(
            store.fetch_oldest_session(Some(&old.id)).unwrap().unwrap().id,
            mid.id
        );

        let all: Vec<_> = store
            .fetch_all_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(all, vec![old.id, mid.id, new.id]);
    }

    #[test]
    fn test_delete() {
        let store = RecordStore::in_memory().unwrap();
        let session = session_at(0);
        store.upsert_session(&session).unwrap();
        assert!(store.delete_session(&session.id).unwrap());
        assert!(!store.delete_session(&session.id).unwrap());
        assert!(store.fetch_session(&session.id).unwrap().is_none());
        assert!(store.fetch_latest_session(None).unwrap().is_none());
    }
}
