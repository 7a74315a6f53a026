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

use super::Attributes;
use crate::ids::{ProcessId, SessionId, SpanId, TraceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Span category, e.g. `ux.session` or `perf`
///
/// Open ended: user spans may carry any type string, the constants below
/// are the ones the library emits itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanType(Cow<'static, str>);

impl SpanType {
    pub const SESSION: SpanType = SpanType(Cow::Borrowed("ux.session"));
    pub const PERFORMANCE: SpanType = SpanType(Cow::Borrowed("perf"));
    pub const VIEW: SpanType = SpanType(Cow::Borrowed("ux.view"));
    pub const NETWORK_REQUEST: SpanType = SpanType(Cow::Borrowed("perf.network_request"));
    pub const LOW_POWER: SpanType = SpanType(Cow::Borrowed("sys.low_power"));

    pub fn new(value: impl Into<String>) -> Self {
        Self(Cow::Owned(value.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

text_enum!(SpanStatus, "span status", {
    Unset => "unset",
    Ok => "ok",
    Error => "error",
});

/// Timestamped annotation owned by a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub event_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub attributes: Attributes,
}

impl SpanEvent {
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            event_type: None,
            timestamp,
            attributes: Attributes::new(),
        }
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Reference from a span to another span context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLink {
    pub span_id: SpanId,
    pub trace_id: TraceId,
    pub attributes: Attributes,
}

impl SpanLink {
    pub fn new(span_id: SpanId, trace_id: TraceId) -> Self {
        Self {
            span_id,
            trace_id,
            attributes: Attributes::new(),
        }
    }
}

/// A tracing span together with its events and links
///
/// Identified by `(trace_id, id)`. A span is open while `end_time` is
/// `None`; once closed it never reopens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub id: SpanId,
    pub trace_id: TraceId,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub span_type: SpanType,
    pub status: SpanStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub process_id: ProcessId,
    pub session_id: Option<SessionId>,
    pub attributes: Attributes,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
}

impl Span {
    /// An open span with no attributes, events or links
    pub fn new(
        id: SpanId,
        trace_id: TraceId,
        name: impl Into<String>,
        span_type: SpanType,
        start_time: DateTime<Utc>,
        process_id: ProcessId,
    ) -> Self {
        Self {
            id,
            trace_id,
            parent_span_id: None,
            name: name.into(),
            span_type,
            status: SpanStatus::Unset,
            start_time,
            end_time: None,
            process_id,
            session_id: None,
            attributes: Attributes::new(),
            events: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn is_session_span(&self) -> bool {
        self.span_type == SpanType::SESSION
    }

    /// Sets `end_time` unless the span is already closed. Returns whether
    /// the span was closed by this call.
    pub fn close(&mut self, end_time: DateTime<Utc>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.end_time = Some(end_time);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::new(
            SpanId::random(),
            TraceId::random(),
            "load",
            SpanType::PERFORMANCE,
            Utc::now(),
            ProcessId::random(),
        )
    }

    #[test]
    fn test_close_is_monotonic() {
        let mut span = span();
        let first = span.start_time + chrono::Duration::seconds(1);
        assert!(span.close(first));
        assert!(!span.close(first + chrono::Duration::seconds(1)));
        assert_eq!(span.end_time, Some(first));
    }

    #[test]
    fn test_span_type_equality_across_storage() {
        assert_eq!(SpanType::new("ux.session"), SpanType::SESSION);
        assert_eq!(SpanType::SESSION.as_str(), "ux.session");
    }

    #[test]
    fn test_status_text() {
        assert_eq!("error".parse::<SpanStatus>().unwrap(), SpanStatus::Error);
        assert_eq!(SpanStatus::default().as_str(), "unset");
    }
}
