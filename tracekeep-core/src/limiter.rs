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

//! Per-session signal limits
//!
//! Answers whether an externally sourced span, event, link, attribute or
//! log may still be added in the current session. Counters live behind one
//! mutex and are reset when a new session starts.

use crate::config::SessionLimits;
use crate::model::{LogSeverity, LogType};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct LimiterState {
    custom_spans: usize,
    session_events: usize,
    session_events_by_type: HashMap<String, usize>,
    info_logs: usize,
    warning_logs: usize,
    error_logs: usize,
}

/// Severity buckets sharing one log counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogBucket {
    Info,
    Warning,
    Error,
}

impl From<LogSeverity> for LogBucket {
    fn from(severity: LogSeverity) -> Self {
        match severity {
            LogSeverity::Trace | LogSeverity::Debug | LogSeverity::Info => LogBucket::Info,
            LogSeverity::Warn => LogBucket::Warning,
            LogSeverity::Error | LogSeverity::Fatal => LogBucket::Error,
        }
    }
}

pub struct SignalsLimiter {
    limits: SessionLimits,
    state: Mutex<LimiterState>,
}

impl SignalsLimiter {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    /// Counts a custom span if the session still has room for one.
    pub fn should_create_custom_span(&self) -> bool {
        let mut state = self.state.lock();
        if state.custom_spans >= self.limits.custom_spans.count {
            tracing::debug!(
                limit = self.limits.custom_spans.count,
                "Custom span limit reached"
            );
            return false;
        }
        state.custom_spans += 1;
        true
    }

    pub fn should_add_span_event(&self, current_count: usize) -> bool {
        current_count < self.limits.events.span_event_count
    }

    pub fn should_add_session_event(&self, current_count: usize) -> bool {
        current_count < self.limits.events.session_event_count
    }

    /// Counts an event on the session span against the session-wide limit
    /// and the limit for its type, if the type has one.
    pub fn should_add_session_event_of_type(&self, event_type: Option<&str>) -> bool {
        let mut state = self.state.lock();
        if state.session_events >= self.limits.events.session_event_count {
            return false;
        }

        if let Some(event_type) = event_type {
            if let Some(&limit) = self.limits.events.type_limits.get(event_type) {
                let count = state
                    .session_events_by_type
                    .entry(event_type.to_string())
                    .or_insert(0);
                if *count >= limit {
                    tracing::debug!(event_type, limit, "Session event type limit reached");
                    return false;
                }
                *count += 1;
            }
        }

        state.session_events += 1;
        true
    }

    pub fn should_add_span_link(&self, current_count: usize) -> bool {
        current_count < self.limits.links.count
    }

    pub fn should_add_span_attribute(&self, current_count: usize) -> bool {
        current_count < self.limits.custom_spans.attribute_count
    }

    /// Counts a log against its severity bucket. Library-originated logs
    /// are always allowed and not counted.
    pub fn should_create_log(&self, log_type: LogType, severity: LogSeverity) -> bool {
        if log_type.is_trusted() {
            return true;
        }

        let mut state = self.state.lock();
        let (count, limit) = match LogBucket::from(severity) {
            LogBucket::Info => (&mut state.info_logs, self.limits.logs.info),
            LogBucket::Warning => (&mut state.warning_logs, self.limits.logs.warning),
            LogBucket::Error => (&mut state.error_logs, self.limits.logs.error),
        };
        if *count >= limit {
            tracing::debug!(severity = %severity, limit, "Log limit reached");
            return false;
        }
        *count += 1;
        true
    }

    /// Clears all counters. Called when a session starts.
    pub fn reset(&self) {
        *self.state.lock() = LimiterState::default();
    }
}
