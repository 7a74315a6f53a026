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

//! Entry point for spans, events and logs produced while a session runs
//!
//! Internal signals come from the library itself and are stored as given.
//! External signals come from the host app and always pass the limiter and
//! the sanitizer first. A refused external signal is skipped; only the
//! `try_*` methods report it as [`CoreError::LimitReached`].

use crate::controller::SessionController;
use crate::error::Result;
use std::sync::Arc;
use tracekeep_core::{
    keys, CoreError, LimitKind, Log, SignalSanitizer, SignalsLimiter, Span, SpanEvent, SpanId,
    SpanLink, TraceId,
};
use tracekeep_storage::{RecordStore, SpanWrite};

/// Where a signal came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOrigin {
    Internal,
    External,
}

pub struct SignalRecorder {
    store: Arc<RecordStore>,
    controller: SessionController,
    limiter: Arc<SignalsLimiter>,
    sanitizer: SignalSanitizer,
}

impl SignalRecorder {
    pub fn new(
        store: Arc<RecordStore>,
        controller: SessionController,
        limiter: Arc<SignalsLimiter>,
        sanitizer: SignalSanitizer,
    ) -> Self {
        Self {
            store,
            controller,
            limiter,
            sanitizer,
        }
    }

    /// Stores a new or updated span. Returns `None` when an external span
    /// was refused by the custom span limit.
    pub fn record_span(&self, mut span: Span, origin: SignalOrigin) -> Result<Option<Span>> {
        if origin == SignalOrigin::External {
            let exists = self.store.fetch_span(&span.id, &span.trace_id)?.is_some();
            if !exists && !self.limiter.should_create_custom_span() {
                tracing::debug!(span_id = %span.id, "Custom span skipped, limit reached");
                return Ok(None);
            }
            span = self.sanitizer.sanitize_span(span);
        }
        if span.session_id.is_none() {
            span.session_id = self.controller.current_session_id();
        }
        Ok(Some(self.store.upsert_span(&span)?))
    }

    /// Like [`record_span`](Self::record_span) for external spans, but a
    /// refused span is an error.
    pub fn try_record_span(&self, span: Span) -> Result<Span> {
        self.record_span(span, SignalOrigin::External)?
            .ok_or_else(|| CoreError::LimitReached(LimitKind::CustomSpan).into())
    }

    /// Appends an event to an open span. Returns `false` if it was skipped.
    pub fn add_span_event(
        &self,
        span_id: &SpanId,
        trace_id: &TraceId,
        event: SpanEvent,
        origin: SignalOrigin,
    ) -> Result<bool> {
        let written = match origin {
            SignalOrigin::Internal => self.store.add_span_event(span_id, trace_id, &event)?,
            SignalOrigin::External => {
                let event = self.sanitizer.sanitize_event(event);
                let write = self.store.add_span_event_if(span_id, trace_id, &event, |count| {
                    self.limiter.should_add_span_event(count)
                })?;
                if write == SpanWrite::Refused {
                    tracing::debug!(span_id = %span_id, "Span event skipped, limit reached");
                }
                write.is_applied()
            }
        };
        Ok(written)
    }

    pub fn try_add_span_event(
        &self,
        span_id: &SpanId,
        trace_id: &TraceId,
        event: SpanEvent,
    ) -> Result<()> {
        let event = self.sanitizer.sanitize_event(event);
        let write = self.store.add_span_event_if(span_id, trace_id, &event, |count| {
            self.limiter.should_add_span_event(count)
        })?;
        match write {
            SpanWrite::Refused => Err(CoreError::LimitReached(LimitKind::SpanEvent).into()),
            SpanWrite::Applied | SpanWrite::NotOpen => Ok(()),
        }
    }

    /// Appends an event to the current session span, counted against the
    /// session-wide and per-type event limits.
    pub fn add_session_event(&self, event: SpanEvent, origin: SignalOrigin) -> Result<bool> {
        let Some(session) = self.controller.current_session() else {
            return Ok(false);
        };
        let event = match origin {
            SignalOrigin::Internal => event,
            SignalOrigin::External => {
                if !self
                    .limiter
                    .should_add_session_event_of_type(event.event_type.as_deref())
                {
                    tracing::debug!(session_id = %session.id, "Session event skipped, limit reached");
                    return Ok(false);
                }
                self.sanitizer.sanitize_event(event)
            }
        };
        Ok(self
            .store
            .add_span_event(&session.span_id, &session.trace_id, &event)?)
    }

    pub fn add_span_link(
        &self,
        span_id: &SpanId,
        trace_id: &TraceId,
        link: SpanLink,
        origin: SignalOrigin,
    ) -> Result<bool> {
        let written = match origin {
            SignalOrigin::Internal => self.store.add_span_link(span_id, trace_id, &link)?,
            SignalOrigin::External => {
                let link = self.sanitizer.sanitize_link(link);
                let write = self.store.add_span_link_if(span_id, trace_id, &link, |count| {
                    self.limiter.should_add_span_link(count)
                })?;
                if write == SpanWrite::Refused {
                    tracing::debug!(span_id = %span_id, "Span link skipped, limit reached");
                }
                write.is_applied()
            }
        };
        Ok(written)
    }

    /// Sets one attribute on an open span. New external keys count against
    /// the span attribute limit; protected keys and overwrites do not.
    pub fn set_span_attribute(
        &self,
        span_id: &SpanId,
        trace_id: &TraceId,
        key: &str,
        value: &str,
        origin: SignalOrigin,
    ) -> Result<bool> {
        let write = match origin {
            SignalOrigin::Internal => {
                self.store
                    .set_span_attribute(span_id, trace_id, key, value, |_| true)?
            }
            SignalOrigin::External => {
                let (key, value) = self.sanitizer.sanitize_pair(key, value);
                self.store
                    .set_span_attribute(span_id, trace_id, &key, &value, |count| {
                        self.limiter.should_add_span_attribute(count)
                    })?
            }
        };
        if write == SpanWrite::Refused {
            tracing::debug!(span_id = %span_id, "Span attribute skipped, limit reached");
        }
        Ok(write.is_applied())
    }

    /// Stores a log. Returns `None` when an external log was refused.
    ///
    /// The session id attribute is added when a session is active.
    pub fn record_log(&self, mut log: Log, origin: SignalOrigin) -> Result<Option<Log>> {
        if origin == SignalOrigin::External {
            if !self.limiter.should_create_log(log.log_type(), log.severity) {
                tracing::debug!(severity = %log.severity, "Log skipped, limit reached");
                return Ok(None);
            }
            log = self.sanitizer.sanitize_log(log);
        }
        if let Some(session_id) = self.controller.current_session_id() {
            log.attributes
                .entry(keys::SESSION_ID.to_string())
                .or_insert_with(|| session_id.to_string());
        }
        Ok(Some(self.store.create_log(&log)?))
    }
}
