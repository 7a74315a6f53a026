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

//! Span records with their events and links
//!
//! New spans are subject to a per-type ceiling: when a type is full the
//! oldest spans of that type (by start time, then insertion order) are
//! evicted first. Updates of an existing span never evict. Closed spans
//! are immutable.

use crate::error::Result;
use crate::sqlite::{attributes_column, parse_column, parse_optional_column};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracekeep_core::{
    encode_attributes, from_micros, keys, to_micros, Attributes, ProcessId, Session, Span, SpanEvent,
    SpanId, SpanLink, SpanStatus, SpanType, TraceId,
};

const SPAN_COLUMNS: &str = "trace_id, id, parent_span_id, name, type, status, start_time, \
     end_time, process_id, session_id, attributes";

/// Outcome of a guarded write to an open span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanWrite {
    Applied,
    /// Refused by the admission check
    Refused,
    /// The span is missing or already closed
    NotOpen,
}

impl SpanWrite {
    pub fn is_applied(self) -> bool {
        self == SpanWrite::Applied
    }
}

/// Selection of spans overlapping a time window
#[derive(Debug, Clone)]
pub struct SpanWindowQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Also return spans that started before `start`
    pub include_started_before: bool,
    /// Restrict spans started before `start` to this process
    pub started_before_process: Option<ProcessId>,
    pub ignore_session_spans: bool,
    pub limit: usize,
}

impl SpanWindowQuery {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, limit: usize) -> Self {
        Self {
            start,
            end,
            include_started_before: false,
            started_before_process: None,
            ignore_session_spans: false,
            limit,
        }
    }

    pub fn include_started_before(mut self, process: Option<ProcessId>) -> Self {
        self.include_started_before = true;
        self.started_before_process = process;
        self
    }

    pub fn ignore_session_spans(mut self, ignore: bool) -> Self {
        self.ignore_session_spans = ignore;
        self
    }
}

fn span_from_row(row: &Row<'_>) -> rusqlite::Result<Span> {
    let span_type: String = row.get(4)?;
    Ok(Span {
        trace_id: parse_column(row, 0)?,
        id: parse_column(row, 1)?,
        parent_span_id: parse_optional_column(row, 2)?,
        name: row.get(3)?,
        span_type: SpanType::new(span_type),
        status: parse_column(row, 5)?,
        start_time: from_micros(row.get(6)?),
        end_time: row.get::<_, Option<i64>>(7)?.map(from_micros),
        process_id: parse_column(row, 8)?,
        session_id: parse_optional_column(row, 9)?,
        attributes: attributes_column(row, 10)?,
        events: Vec::new(),
        links: Vec::new(),
    })
}

fn load_children(conn: &Connection, span: &mut Span) -> Result<()> {
    let trace = span.trace_id.to_string();
    let id = span.id.to_string();

    let mut stmt = conn.prepare_cached(
        "SELECT name, type, timestamp, attributes FROM span_events
         WHERE trace_id = ?1 AND span_id = ?2 ORDER BY seq ASC",
    )?;
    let events = stmt.query_map(params![trace, id], |row| {
        Ok(SpanEvent {
            name: row.get(0)?,
            event_type: row.get(1)?,
            timestamp: from_micros(row.get(2)?),
            attributes: attributes_column(row, 3)?,
        })
    })?;
    span.events = events.collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare_cached(
        "SELECT linked_span_id, linked_trace_id, attributes FROM span_links
         WHERE trace_id = ?1 AND span_id = ?2 ORDER BY seq ASC",
    )?;
    let links = stmt.query_map(params![trace, id], |row| {
        Ok(SpanLink {
            span_id: parse_column(row, 0)?,
            trace_id: parse_column(row, 1)?,
            attributes: attributes_column(row, 2)?,
        })
    })?;
    span.links = links.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(())
}

fn load_span(conn: &Connection, id: &SpanId, trace_id: &TraceId) -> Result<Option<Span>> {
    let sql = format!(
        "SELECT {} FROM spans WHERE trace_id = ?1 AND id = ?2",
        SPAN_COLUMNS
    );
    let span = conn
        .query_row(
            &sql,
            params![trace_id.to_string(), id.to_string()],
            span_from_row,
        )
        .optional()?;
    match span {
        Some(mut span) => {
            load_children(conn, &mut span)?;
            Ok(Some(span))
        }
        None => Ok(None),
    }
}

fn query_spans(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Span>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, span_from_row)?;
    let mut spans = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    for span in &mut spans {
        load_children(conn, span)?;
    }
    Ok(spans)
}

/// `Some(is_closed)` if the span exists
fn span_state(conn: &Connection, id: &SpanId, trace_id: &TraceId) -> Result<Option<bool>> {
    Ok(conn
        .query_row(
            "SELECT end_time IS NOT NULL FROM spans WHERE trace_id = ?1 AND id = ?2",
            params![trace_id.to_string(), id.to_string()],
            |row| row.get(0),
        )
        .optional()?)
}

fn count_children(conn: &Connection, table: &str, trace: &str, span: &str) -> Result<usize> {
    let n: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE trace_id = ?1 AND span_id = ?2",
            table
        ),
        params![trace, span],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

fn insert_event(tx: &Transaction<'_>, span: (&str, &str), event: &SpanEvent) -> Result<()> {
    tx.execute(
        "INSERT INTO span_events (trace_id, span_id, seq, name, type, timestamp, attributes)
         VALUES (?1, ?2,
            (SELECT COALESCE(MAX(seq) + 1, 0) FROM span_events WHERE trace_id = ?1 AND span_id = ?2),
            ?3, ?4, ?5, ?6)",
        params![
            span.0,
            span.1,
            event.name,
            event.event_type,
            to_micros(event.timestamp),
            encode_attributes(&event.attributes),
        ],
    )?;
    Ok(())
}

fn insert_link(tx: &Transaction<'_>, span: (&str, &str), link: &SpanLink) -> Result<()> {
    tx.execute(
        "INSERT INTO span_links (trace_id, span_id, seq, linked_trace_id, linked_span_id, attributes)
         VALUES (?1, ?2,
            (SELECT COALESCE(MAX(seq) + 1, 0) FROM span_links WHERE trace_id = ?1 AND span_id = ?2),
            ?3, ?4, ?5)",
        params![
            span.0,
            span.1,
            link.trace_id.to_string(),
            link.span_id.to_string(),
            encode_attributes(&link.attributes),
        ],
    )?;
    Ok(())
}

fn replace_children(tx: &Transaction<'_>, span: &Span) -> Result<()> {
    let trace = span.trace_id.to_string();
    let id = span.id.to_string();
    tx.execute(
        "DELETE FROM span_events WHERE trace_id = ?1 AND span_id = ?2",
        params![trace, id],
    )?;
    tx.execute(
        "DELETE FROM span_links WHERE trace_id = ?1 AND span_id = ?2",
        params![trace, id],
    )?;
    for event in &span.events {
        insert_event(tx, (trace.as_str(), id.as_str()), event)?;
    }
    for link in &span.links {
        insert_link(tx, (trace.as_str(), id.as_str()), link)?;
    }
    Ok(())
}

/// Deletes the oldest spans of `span_type` until one more fits under `limit`.
fn evict_for_insert(tx: &Transaction<'_>, span_type: &SpanType, limit: usize) -> Result<usize> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM spans WHERE type = ?1",
        params![span_type.as_str()],
        |row| row.get(0),
    )?;
    let count = count as usize;
    if count < limit {
        return Ok(0);
    }
    let overflow = count - limit + 1;
    let evicted = tx.execute(
        "DELETE FROM spans WHERE rowid IN (
            SELECT rowid FROM spans WHERE type = ?1
            ORDER BY start_time ASC, rowid ASC LIMIT ?2)",
        params![span_type.as_str(), overflow as i64],
    )?;
    tracing::warn!(
        span_type = %span_type,
        evicted,
        limit,
        "Span type limit reached, evicted oldest spans"
    );
    Ok(evicted)
}

impl RecordStore {
    /// Inserts a new span or updates an open one.
    ///
    /// Returns the stored span. A span that is already closed is returned
    /// as stored and the update is ignored.
    pub fn upsert_span(&self, span: &Span) -> Result<Span> {
        let limit = self.limits().span_limit_per_type;
        let stored = self.db().write(|conn| {
            let tx = conn.transaction()?;
            match span_state(&tx, &span.id, &span.trace_id)? {
                Some(true) => {
                    tracing::debug!(span_id = %span.id, "Ignoring update of closed span");
                }
                Some(false) => {
                    write_span_row(
                        &tx,
                        "UPDATE spans SET parent_span_id = ?3, name = ?4, type = ?5, status = ?6,
                            start_time = ?7, end_time = ?8, process_id = ?9, session_id = ?10,
                            attributes = ?11
                         WHERE trace_id = ?1 AND id = ?2",
                        span,
                    )?;
                    replace_children(&tx, span)?;
                }
                None => {
                    evict_for_insert(&tx, &span.span_type, limit)?;
                    write_span_row(
                        &tx,
                        "INSERT INTO spans (trace_id, id, parent_span_id, name, type, status,
                            start_time, end_time, process_id, session_id, attributes)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                        span,
                    )?;
                    replace_children(&tx, span)?;
                }
            }
            let stored = load_span(&tx, &span.id, &span.trace_id)?;
            tx.commit()?;
            Ok(stored)
        })?;
        Ok(stored.unwrap_or_else(|| span.clone()))
    }

    pub fn fetch_span(&self, id: &SpanId, trace_id: &TraceId) -> Result<Option<Span>> {
        self.db().read(|conn| load_span(conn, id, trace_id))
    }

    /// Closes an open span. Returns `false` if it is missing or already closed.
    pub fn end_span(&self, id: &SpanId, trace_id: &TraceId, end_time: DateTime<Utc>) -> Result<bool> {
        self.update_open_span(
            "UPDATE spans SET end_time = ?3 WHERE trace_id = ?1 AND id = ?2 AND end_time IS NULL",
            id,
            trace_id,
            &to_micros(end_time),
        )
    }

    pub fn set_span_status(&self, id: &SpanId, trace_id: &TraceId, status: SpanStatus) -> Result<bool> {
        self.update_open_span(
            "UPDATE spans SET status = ?3 WHERE trace_id = ?1 AND id = ?2 AND end_time IS NULL",
            id,
            trace_id,
            &status.as_str(),
        )
    }

    /// Replaces the attributes of an open span.
    pub fn set_span_attributes(
        &self,
        id: &SpanId,
        trace_id: &TraceId,
        attributes: &Attributes,
    ) -> Result<bool> {
        self.update_open_span(
            "UPDATE spans SET attributes = ?3 WHERE trace_id = ?1 AND id = ?2 AND end_time IS NULL",
            id,
            trace_id,
            &encode_attributes(attributes),
        )
    }

    fn update_open_span(
        &self,
        sql: &str,
        id: &SpanId,
        trace_id: &TraceId,
        value: &dyn rusqlite::ToSql,
    ) -> Result<bool> {
        let updated = self.db().write(|conn| {
            Ok(conn.execute(
                sql,
                params![trace_id.to_string(), id.to_string(), value],
            )?)
        })?;
        Ok(updated > 0)
    }

    /// Merges one attribute into an open span.
    ///
    /// A key the span does not have yet is counted first: `admit` receives
    /// the number of non-protected keys already set and may refuse the write.
    /// Overwrites and protected keys skip the check. The read and the update
    /// share one write transaction, so concurrent writers never lose keys.
    pub fn set_span_attribute(
        &self,
        id: &SpanId,
        trace_id: &TraceId,
        key: &str,
        value: &str,
        admit: impl Fn(usize) -> bool,
    ) -> Result<SpanWrite> {
        let trace = trace_id.to_string();
        let span = id.to_string();
        self.db().write(|conn| {
            let tx = conn.transaction()?;
            let Some(mut attributes) = tx
                .query_row(
                    "SELECT attributes FROM spans
                     WHERE trace_id = ?1 AND id = ?2 AND end_time IS NULL",
                    params![trace, span],
                    |row| attributes_column(row, 0),
                )
                .optional()?
            else {
                return Ok(SpanWrite::NotOpen);
            };

            if !attributes.contains_key(key) && !keys::is_protected(key) {
                let count = attributes.keys().filter(|k| !keys::is_protected(k)).count();
                if !admit(count) {
                    return Ok(SpanWrite::Refused);
                }
            }
            attributes.insert(key.to_string(), value.to_string());
            tx.execute(
                "UPDATE spans SET attributes = ?3 WHERE trace_id = ?1 AND id = ?2",
                params![trace, span, encode_attributes(&attributes)],
            )?;
            tx.commit()?;
            Ok(SpanWrite::Applied)
        })
    }

    /// Appends an event to an open span.
    pub fn add_span_event(&self, id: &SpanId, trace_id: &TraceId, event: &SpanEvent) -> Result<bool> {
        Ok(self.add_span_event_if(id, trace_id, event, |_| true)?.is_applied())
    }

    /// Appends an event if `admit` accepts the span's current event count.
    /// Counting and inserting happen in one write transaction.
    pub fn add_span_event_if(
        &self,
        id: &SpanId,
        trace_id: &TraceId,
        event: &SpanEvent,
        admit: impl Fn(usize) -> bool,
    ) -> Result<SpanWrite> {
        self.add_child(id, trace_id, "span_events", admit, |tx, span| {
            insert_event(tx, span, event)
        })
    }

    /// Appends a link to an open span.
    pub fn add_span_link(&self, id: &SpanId, trace_id: &TraceId, link: &SpanLink) -> Result<bool> {
        Ok(self.add_span_link_if(id, trace_id, link, |_| true)?.is_applied())
    }

    /// Appends a link if `admit` accepts the span's current link count.
    pub fn add_span_link_if(
        &self,
        id: &SpanId,
        trace_id: &TraceId,
        link: &SpanLink,
        admit: impl Fn(usize) -> bool,
    ) -> Result<SpanWrite> {
        self.add_child(id, trace_id, "span_links", admit, |tx, span| {
            insert_link(tx, span, link)
        })
    }

    fn add_child(
        &self,
        id: &SpanId,
        trace_id: &TraceId,
        table: &str,
        admit: impl Fn(usize) -> bool,
        insert: impl Fn(&Transaction<'_>, (&str, &str)) -> Result<()>,
    ) -> Result<SpanWrite> {
        let trace = trace_id.to_string();
        let span = id.to_string();
        self.db().write(|conn| {
            let tx = conn.transaction()?;
            if span_state(&tx, id, trace_id)? != Some(false) {
                return Ok(SpanWrite::NotOpen);
            }
            if !admit(count_children(&tx, table, &trace, &span)?) {
                return Ok(SpanWrite::Refused);
            }
            insert(&tx, (trace.as_str(), span.as_str()))?;
            tx.commit()?;
            Ok(SpanWrite::Applied)
        })
    }

    pub fn span_event_count(&self, id: &SpanId, trace_id: &TraceId) -> Result<usize> {
        self.child_count("span_events", id, trace_id)
    }

    pub fn span_link_count(&self, id: &SpanId, trace_id: &TraceId) -> Result<usize> {
        self.child_count("span_links", id, trace_id)
    }

    fn child_count(&self, table: &str, id: &SpanId, trace_id: &TraceId) -> Result<usize> {
        let trace = trace_id.to_string();
        let span = id.to_string();
        self.db()
            .read(|conn| count_children(conn, table, &trace, &span))
    }

    /// Spans that are open or ended inside the window, oldest first.
    pub fn fetch_spans(&self, query: &SpanWindowQuery) -> Result<Vec<Span>> {
        let start = to_micros(query.start);
        let end = to_micros(query.end);
        let before_process = query.started_before_process.map(|p| p.hex());
        let sql = format!(
            "SELECT {} FROM spans
             WHERE (end_time IS NULL OR (end_time >= ?1 AND end_time <= ?2))
               AND start_time <= ?2
               AND (start_time >= ?1 OR (?3 AND (?4 IS NULL OR process_id = ?4)))
               AND (NOT ?5 OR type != ?6)
             ORDER BY start_time ASC, rowid ASC
             LIMIT ?7",
            SPAN_COLUMNS
        );
        self.db().read(|conn| {
            query_spans(
                conn,
                &sql,
                params![
                    start,
                    end,
                    query.include_started_before,
                    before_process,
                    query.ignore_session_spans,
                    SpanType::SESSION.as_str(),
                    query.limit as i64,
                ],
            )
        })
    }

    /// Spans recorded during `session`.
    ///
    /// An open session's window ends at its last heartbeat. For cold-start
    /// sessions, spans of the same process that started before the session
    /// (app launch work) are included.
    pub fn fetch_spans_for_session(
        &self,
        session: &Session,
        ignore_session_spans: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Span>> {
        let end = session.end_time.unwrap_or(session.last_heartbeat_time);
        let mut query = SpanWindowQuery::new(
            session.start_time,
            end,
            limit.unwrap_or(self.limits().spans_per_session_limit),
        )
        .ignore_session_spans(ignore_session_spans);
        if session.cold_start {
            query = query.include_started_before(Some(session.process_id));
        }
        self.fetch_spans(&query)
    }

    /// Closes every open span not owned by `current_process`.
    pub fn close_open_spans(&self, end_time: DateTime<Utc>, current_process: &ProcessId) -> Result<usize> {
        let closed = self.db().write(|conn| {
            Ok(conn.execute(
                "UPDATE spans SET end_time = ?1 WHERE end_time IS NULL AND process_id != ?2",
                params![to_micros(end_time), current_process.hex()],
            )?)
        })?;
        if closed > 0 {
            tracing::info!(closed, "Closed open spans from previous processes");
        }
        Ok(closed)
    }

    /// Deletes closed spans that ended before `before`. Without a cutoff,
    /// deletes every closed span of other processes.
    pub fn clean_up_spans(
        &self,
        before: Option<DateTime<Utc>>,
        current_process: &ProcessId,
    ) -> Result<usize> {
        let deleted = self.db().write(|conn| {
            let n = match before {
                Some(cutoff) => conn.execute(
                    "DELETE FROM spans WHERE end_time IS NOT NULL AND end_time < ?1",
                    params![to_micros(cutoff)],
                )?,
                None => conn.execute(
                    "DELETE FROM spans WHERE end_time IS NOT NULL AND process_id != ?1",
                    params![current_process.hex()],
                )?,
            };
            Ok(n)
        })?;
        if deleted > 0 {
            tracing::info!(deleted, "Removed old spans");
        }
        Ok(deleted)
    }

    pub fn delete_span(&self, id: &SpanId, trace_id: &TraceId) -> Result<bool> {
        let deleted = self.db().write(|conn| {
            Ok(conn.execute(
                "DELETE FROM spans WHERE trace_id = ?1 AND id = ?2",
                params![trace_id.to_string(), id.to_string()],
            )?)
        })?;
        Ok(deleted > 0)
    }

    /// Number of stored spans, optionally of one type
    pub fn span_count(&self, span_type: Option<&SpanType>) -> Result<usize> {
        let span_type = span_type.map(|t| t.as_str().to_string());
        self.db().read(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM spans WHERE ?1 IS NULL OR type = ?1",
                params![span_type],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }
}

/// Runs an insert or update whose eleven parameters are the span columns
/// in `SPAN_COLUMNS` order.
fn write_span_row(tx: &Transaction<'_>, sql: &str, span: &Span) -> Result<()> {
    tx.execute(
        sql,
        params![
            span.trace_id.to_string(),
            span.id.to_string(),
            span.parent_span_id.map(|p| p.to_string()),
            span.name,
            span.span_type.as_str(),
            span.status.as_str(),
            to_micros(span.start_time),
            span.end_time.map(to_micros),
            span.process_id.hex(),
            span.session_id.map(|s| s.to_string()),
            encode_attributes(&span.attributes),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::StorageOptions;
    use chrono::Duration;
    use tracekeep_core::{keys, SessionId, SessionState, StorageLimits};

    fn base_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn span(span_type: SpanType, start_offset: i64, process: ProcessId) -> Span {
        Span::new(
            SpanId::random(),
            TraceId::random(),
            "work",
            span_type,
            base_time() + Duration::seconds(start_offset),
            process,
        )
    }

    fn store_with_span_limit(limit: usize) -> RecordStore {
        let limits = StorageLimits {
            span_limit_per_type: limit,
            ..StorageLimits::default()
        };
        RecordStore::open(StorageOptions::default().with_limits(limits)).unwrap()
    }

    #[test]
    fn test_round_trip_with_children() {
        let store = RecordStore::in_memory().unwrap();
        let mut s = span(SpanType::PERFORMANCE, 0, ProcessId::new(1));
        s.parent_span_id = Some(SpanId::new(7));
        s.session_id = Some(SessionId::random());
        s.attributes.insert("a,b".into(), "c%d".into());
        s.events.push(
            SpanEvent::new("tap", base_time())
                .with_type("ux.tap")
                .with_attributes([("x".to_string(), "1".to_string())].into()),
        );
        s.events.push(SpanEvent::new("second", base_time()));
        s.links.push(SpanLink::new(SpanId::new(9), TraceId::new(9)));

        store.upsert_span(&s).unwrap();
        let fetched = store.fetch_span(&s.id, &s.trace_id).unwrap().unwrap();
        assert_eq!(fetched, s);
    }

    #[test]
    fn test_eviction_removes_oldest_of_type() {
        let store = store_with_span_limit(3);
        let process = ProcessId::new(1);
        let spans: Vec<_> = (0..3)
            .map(|i| span(SpanType::PERFORMANCE, i * 10, process))
            .collect();
        for s in &spans {
            store.upsert_span(s).unwrap();
        }
        // Other types are not affected by the ceiling.
        store.upsert_span(&span(SpanType::VIEW, -100, process)).unwrap();

        let newest = span(SpanType::PERFORMANCE, 100, process);
        store.upsert_span(&newest).unwrap();

        assert_eq!(store.span_count(Some(&SpanType::PERFORMANCE)).unwrap(), 3);
        assert!(store.fetch_span(&spans[0].id, &spans[0].trace_id).unwrap().is_none());
        assert!(store.fetch_span(&spans[1].id, &spans[1].trace_id).unwrap().is_some());
        assert_eq!(store.span_count(Some(&SpanType::VIEW)).unwrap(), 1);
    }

    #[test]
    fn test_eviction_tie_break_is_insertion_order() {
        let store = store_with_span_limit(2);
        let process = ProcessId::new(1);
        let first = span(SpanType::PERFORMANCE, 0, process);
        let second = span(SpanType::PERFORMANCE, 0, process);
        store.upsert_span(&first).unwrap();
        store.upsert_span(&second).unwrap();
        store.upsert_span(&span(SpanType::PERFORMANCE, 0, process)).unwrap();

        assert!(store.fetch_span(&first.id, &first.trace_id).unwrap().is_none());
        assert!(store.fetch_span(&second.id, &second.trace_id).unwrap().is_some());
    }

    #[test]
    fn test_update_never_evicts() {
        let store = store_with_span_limit(2);
        let process = ProcessId::new(1);
        let mut a = span(SpanType::PERFORMANCE, 0, process);
        let b = span(SpanType::PERFORMANCE, 1, process);
        store.upsert_span(&a).unwrap();
        store.upsert_span(&b).unwrap();

        a.name = "renamed".into();
        a.attributes.insert("k".into(), "v".into());
        let stored = store.upsert_span(&a).unwrap();

        assert_eq!(stored.name, "renamed");
        assert_eq!(store.span_count(None).unwrap(), 2);
        assert!(store.fetch_span(&b.id, &b.trace_id).unwrap().is_some());
    }

    #[test]
    fn test_closed_span_is_immutable() {
        let store = RecordStore::in_memory().unwrap();
        let mut s = span(SpanType::PERFORMANCE, 0, ProcessId::new(1));
        store.upsert_span(&s).unwrap();
        let end = base_time() + Duration::seconds(5);
        assert!(store.end_span(&s.id, &s.trace_id, end).unwrap());
        assert!(!store.end_span(&s.id, &s.trace_id, end + Duration::seconds(1)).unwrap());

        s.name = "changed".into();
        s.end_time = None;
        let stored = store.upsert_span(&s).unwrap();
        assert_eq!(stored.name, "work");
        assert_eq!(stored.end_time, Some(end));

        assert!(!store.set_span_status(&s.id, &s.trace_id, SpanStatus::Error).unwrap());
        assert!(!store
            .add_span_event(&s.id, &s.trace_id, &SpanEvent::new("late", end))
            .unwrap());
    }

    #[test]
    fn test_incremental_events_links_and_status() {
        let store = RecordStore::in_memory().unwrap();
        let s = span(SpanType::PERFORMANCE, 0, ProcessId::new(1));
        store.upsert_span(&s).unwrap();

        for name in ["a", "b", "c"] {
            assert!(store
                .add_span_event(&s.id, &s.trace_id, &SpanEvent::new(name, base_time()))
                .unwrap());
        }
        assert!(store
            .add_span_link(&s.id, &s.trace_id, &SpanLink::new(SpanId::new(3), TraceId::new(3)))
            .unwrap());
        assert!(store.set_span_status(&s.id, &s.trace_id, SpanStatus::Ok).unwrap());
        let attrs: Attributes = [("k".to_string(), "v".to_string())].into();
        assert!(store.set_span_attributes(&s.id, &s.trace_id, &attrs).unwrap());

        assert_eq!(store.span_event_count(&s.id, &s.trace_id).unwrap(), 3);
        assert_eq!(store.span_link_count(&s.id, &s.trace_id).unwrap(), 1);
        let fetched = store.fetch_span(&s.id, &s.trace_id).unwrap().unwrap();
        let names: Vec<_> = fetched.events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(fetched.status, SpanStatus::Ok);
        assert_eq!(fetched.attributes, attrs);
    }

    #[test]
    fn test_guarded_writes_check_counts() {
        let store = RecordStore::in_memory().unwrap();
        let s = span(SpanType::PERFORMANCE, 0, ProcessId::new(1));
        store.upsert_span(&s).unwrap();
        let below_two = |count: usize| count < 2;

        for expected in [SpanWrite::Applied, SpanWrite::Applied, SpanWrite::Refused] {
            let event = SpanEvent::new("e", base_time());
            assert_eq!(
                store.add_span_event_if(&s.id, &s.trace_id, &event, below_two).unwrap(),
                expected
            );
            let link = SpanLink::new(SpanId::new(9), TraceId::new(9));
            assert_eq!(
                store.add_span_link_if(&s.id, &s.trace_id, &link, below_two).unwrap(),
                expected
            );
        }

        let set = |key: &str| {
            store
                .set_span_attribute(&s.id, &s.trace_id, key, "v", below_two)
                .unwrap()
        };
        assert_eq!(set("a"), SpanWrite::Applied);
        assert_eq!(set("b"), SpanWrite::Applied);
        assert_eq!(set("c"), SpanWrite::Refused);
        // Overwrites and protected keys are not counted.
        assert_eq!(set("a"), SpanWrite::Applied);
        assert_eq!(set(keys::STATE), SpanWrite::Applied);

        let fetched = store.fetch_span(&s.id, &s.trace_id).unwrap().unwrap();
        assert_eq!(fetched.events.len(), 2);
        assert_eq!(fetched.links.len(), 2);
        assert_eq!(fetched.attributes.len(), 3);

        store.end_span(&s.id, &s.trace_id, base_time()).unwrap();
        assert_eq!(set("a"), SpanWrite::NotOpen);
        let missing = SpanId::new(404);
        assert_eq!(
            store
                .set_span_attribute(&missing, &s.trace_id, "a", "v", |_| true)
                .unwrap(),
            SpanWrite::NotOpen
        );
    }

    #[test]
    fn test_delete_cascades_children() {
        let store = RecordStore::in_memory().unwrap();
        let mut s = span(SpanType::PERFORMANCE, 0, ProcessId::new(1));
        s.events.push(SpanEvent::new("e", base_time()));
        s.links.push(SpanLink::new(SpanId::new(1), TraceId::new(1)));
        store.upsert_span(&s).unwrap();

        assert!(store.delete_span(&s.id, &s.trace_id).unwrap());
        let stats = store.stats().unwrap();
        assert_eq!(stats.spans, 0);
        assert_eq!(stats.span_events, 0);
        assert_eq!(stats.span_links, 0);
    }

    #[test]
    fn test_window_query() {
        let store = RecordStore::in_memory().unwrap();
        let process = ProcessId::new(1);
        let other = ProcessId::new(2);

        let mut inside = span(SpanType::PERFORMANCE, 10, process);
        inside.end_time = Some(base_time() + Duration::seconds(20));
        let open = span(SpanType::PERFORMANCE, 30, process);
        let mut ended_before = span(SpanType::PERFORMANCE, -20, process);
        ended_before.end_time = Some(base_time() - Duration::seconds(10));
        let mut launch = span(SpanType::PERFORMANCE, -5, process);
        launch.end_time = Some(base_time() + Duration::seconds(1));
        let mut other_launch = span(SpanType::PERFORMANCE, -5, other);
        other_launch.end_time = Some(base_time() + Duration::seconds(1));
        let mut session_span = span(SpanType::SESSION, 0, process);
        session_span
            .attributes
            .insert(keys::TYPE.into(), "ux.session".into());

        for s in [&inside, &open, &ended_before, &launch, &other_launch, &session_span] {
            store.upsert_span(s).unwrap();
        }

        let window = SpanWindowQuery::new(base_time(), base_time() + Duration::seconds(60), 100);
        let ids: Vec<_> = store.fetch_spans(&window).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![session_span.id, inside.id, open.id]);

        let ids: Vec<_> = store
            .fetch_spans(&window.clone().ignore_session_spans(true))
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![inside.id, open.id]);

        let ids: Vec<_> = store
            .fetch_spans(&window.clone().include_started_before(Some(process)))
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![launch.id, session_span.id, inside.id, open.id]);

        let limited = SpanWindowQuery::new(base_time(), base_time() + Duration::seconds(60), 1);
        assert_eq!(store.fetch_spans(&limited).unwrap().len(), 1);
    }

    #[test]
    fn test_spans_for_cold_start_session() {
        let store = RecordStore::in_memory().unwrap();
        let process = ProcessId::new(1);
        let mut session = Session::new(SessionId::random(), process, SessionState::Foreground, base_time());
        session.end_time = Some(base_time() + Duration::seconds(60));

        let mut launch = span(SpanType::PERFORMANCE, -3, process);
        launch.end_time = Some(base_time() + Duration::seconds(2));
        store.upsert_span(&launch).unwrap();

        assert!(store.fetch_spans_for_session(&session, true, None).unwrap().is_empty());
        session.cold_start = true;
        assert_eq!(store.fetch_spans_for_session(&session, true, None).unwrap().len(), 1);
    }

    #[test]
    fn test_close_and_clean_up() {
        let store = RecordStore::in_memory().unwrap();
        let current = ProcessId::new(1);
        let previous = ProcessId::new(2);

        let mine = span(SpanType::PERFORMANCE, 0, current);
        let orphan = span(SpanType::PERFORMANCE, 0, previous);
        store.upsert_span(&mine).unwrap();
        store.upsert_span(&orphan).unwrap();

        let end = base_time() + Duration::seconds(30);
        assert_eq!(store.close_open_spans(end, &current).unwrap(), 1);
        let closed = store.fetch_span(&orphan.id, &orphan.trace_id).unwrap().unwrap();
        assert_eq!(closed.end_time, Some(end));
        assert!(store.fetch_span(&mine.id, &mine.trace_id).unwrap().unwrap().end_time.is_none());

        // Cutoff before the close time keeps the span.
        assert_eq!(store.clean_up_spans(Some(end - Duration::seconds(1)), &current).unwrap(), 0);
        assert_eq!(store.clean_up_spans(None, &current).unwrap(), 1);
        assert_eq!(store.span_count(None).unwrap(), 1);
    }
}
