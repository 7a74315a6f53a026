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

//! Record store schema

use crate::sqlite::{Migration, Schema};

/// Timestamps are stored as integer microseconds since the Unix epoch.
/// Attribute maps use the single-column attribute codec.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    process_id TEXT NOT NULL,
    state TEXT NOT NULL,
    trace_id TEXT NOT NULL,
    span_id TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    last_heartbeat_time INTEGER NOT NULL,
    crash_report_id TEXT,
    cold_start INTEGER NOT NULL DEFAULT 0,
    clean_exit INTEGER NOT NULL DEFAULT 0,
    app_terminated INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_sessions_start_time ON sessions(start_time);

CREATE TABLE IF NOT EXISTS spans (
    trace_id TEXT NOT NULL,
    id TEXT NOT NULL,
    parent_span_id TEXT,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    status TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    process_id TEXT NOT NULL,
    session_id TEXT,
    attributes TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (trace_id, id)
);
CREATE INDEX IF NOT EXISTS idx_spans_type_start ON spans(type, start_time);
CREATE INDEX IF NOT EXISTS idx_spans_process ON spans(process_id);

CREATE TABLE IF NOT EXISTS span_events (
    trace_id TEXT NOT NULL,
    span_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    name TEXT NOT NULL,
    type TEXT,
    timestamp INTEGER NOT NULL,
    attributes TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (trace_id, span_id, seq),
    FOREIGN KEY (trace_id, span_id) REFERENCES spans(trace_id, id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS span_links (
    trace_id TEXT NOT NULL,
    span_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    linked_trace_id TEXT NOT NULL,
    linked_span_id TEXT NOT NULL,
    attributes TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (trace_id, span_id, seq),
    FOREIGN KEY (trace_id, span_id) REFERENCES spans(trace_id, id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS logs (
    id TEXT PRIMARY KEY,
    process_id TEXT NOT NULL,
    severity INTEGER NOT NULL,
    body TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    attributes TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_logs_process ON logs(process_id);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    type TEXT NOT NULL,
    lifespan TEXT NOT NULL,
    lifespan_id TEXT NOT NULL,
    collected_at INTEGER NOT NULL,
    PRIMARY KEY (key, type, lifespan, lifespan_id)
);
"#;

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema",
        up_sql: "",
    },
    Migration {
        version: 2,
        description: "Index spans by session",
        up_sql: "CREATE INDEX IF NOT EXISTS idx_spans_session ON spans(session_id);",
    },
    Migration {
        version: 3,
        description: "Index metadata by lifespan",
        up_sql: "CREATE INDEX IF NOT EXISTS idx_metadata_lifespan ON metadata(lifespan, lifespan_id);",
    },
];

pub static RECORD_SCHEMA: Schema = Schema {
    name: "records",
    base_sql: SCHEMA_SQL,
    migrations: MIGRATIONS,
};
