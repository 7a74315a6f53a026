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

use crate::ids::{ProcessId, SessionId, SpanId, TraceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Application state a session was recorded in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Foreground,
    Background,
}

text_enum!(SessionState, "session state", {
    Foreground => "foreground",
    Background => "background",
});

/// One app session
///
/// Created by the session controller and mutated in place until it ends.
/// `end_time` is only set once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub process_id: ProcessId,
    pub state: SessionState,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_heartbeat_time: DateTime<Utc>,
    pub crash_report_id: Option<String>,
    pub cold_start: bool,
    pub clean_exit: bool,
    pub app_terminated: bool,
}

impl Session {
    /// A fresh, open session whose heartbeat starts at `start_time`
    pub fn new(
        id: SessionId,
        process_id: ProcessId,
        state: SessionState,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            process_id,
            state,
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            start_time,
            end_time: None,
            last_heartbeat_time: start_time,
            crash_report_id: None,
            cold_start: false,
            clean_exit: false,
            app_terminated: false,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }
}
