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

//! Truncation and count capping for externally supplied signals.
//!
//! Attribute maps keep the first `N` keys in lexicographic order. Protected
//! keys (see [`keys::PROTECTED`]) are never dropped or truncated, so a
//! sanitized map may hold up to `N` plus the number of protected keys.

use crate::config::{AttributeLimits, SessionLimits};
use crate::model::{keys, Attributes, Log, Span, SpanEvent, SpanLink};
use std::borrow::Cow;

/// Truncates `text` to at most `max_chars` characters.
pub fn truncate(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => Cow::Owned(text[..byte_idx].to_string()),
        None => Cow::Borrowed(text),
    }
}

/// Trims surrounding whitespace and control characters, then truncates.
pub fn sanitize_name(name: &str, max_chars: usize) -> String {
    let trimmed = name.trim_matches(|c: char| c.is_whitespace() || c.is_control());
    truncate(trimmed, max_chars).into_owned()
}

/// Stateless sanitizer configured with per-session and attribute limits.
#[derive(Debug, Clone, Default)]
pub struct SignalSanitizer {
    limits: SessionLimits,
    attributes: AttributeLimits,
}

impl SignalSanitizer {
    pub fn new(limits: SessionLimits, attributes: AttributeLimits) -> Self {
        Self { limits, attributes }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    /// Truncates a single attribute. Protected keys pass unchanged.
    pub fn sanitize_pair(&self, key: &str, value: &str) -> (String, String) {
        if keys::is_protected(key) {
            return (key.to_string(), value.to_string());
        }
        (
            truncate(key, self.attributes.key_length).into_owned(),
            truncate(value, self.attributes.value_length).into_owned(),
        )
    }

    /// Caps `attributes` to `count_limit` entries and truncates the kept
    /// keys and values.
    pub fn sanitize_attributes(&self, attributes: Attributes, count_limit: usize) -> Attributes {
        let total = attributes.len();
        let mut sanitized = Attributes::new();
        let mut protected = Vec::new();

        // BTreeMap iteration is already lexicographic.
        for (index, (key, value)) in attributes.into_iter().enumerate() {
            if keys::is_protected(&key) {
                protected.push((key, value));
                continue;
            }
            if index >= count_limit {
                continue;
            }
            let truncated = truncate(&key, self.attributes.key_length).into_owned();
            if sanitized.contains_key(&truncated) {
                // Two keys sharing a prefix: the lexicographically first wins.
                tracing::debug!(
                    key = %key,
                    truncated = %truncated,
                    "Dropping attribute with colliding truncated key"
                );
                continue;
            }
            let value = truncate(&value, self.attributes.value_length).into_owned();
            sanitized.insert(truncated, value);
        }
        sanitized.extend(protected);

        if sanitized.len() < total {
            tracing::warn!(
                dropped = total - sanitized.len(),
                limit = count_limit,
                "Attribute count limit reached"
            );
        }
        sanitized
    }

    pub fn sanitize_event(&self, mut event: SpanEvent) -> SpanEvent {
        event.name = sanitize_name(&event.name, self.limits.events.name_length);
        event.attributes =
            self.sanitize_attributes(event.attributes, self.limits.events.attribute_count);
        event
    }

    pub fn sanitize_link(&self, mut link: SpanLink) -> SpanLink {
        link.attributes =
            self.sanitize_attributes(link.attributes, self.limits.links.attribute_count);
        link
    }

    /// Sanitizes a span with its events and links. Events and links keep
    /// their received order and are cut by prefix.
    pub fn sanitize_span(&self, mut span: Span) -> Span {
        let name = sanitize_name(&span.name, self.limits.custom_spans.name_length);
        if name.len() != span.name.len() {
            tracing::debug!(span_id = %span.id, "Span name sanitized");
        }
        span.name = name;
        span.attributes =
            self.sanitize_attributes(span.attributes, self.limits.custom_spans.attribute_count);

        let event_limit = if span.is_session_span() {
            self.limits.events.session_event_count
        } else {
            self.limits.events.span_event_count
        };
        if span.events.len() > event_limit {
            tracing::warn!(
                span_id = %span.id,
                received = span.events.len(),
                limit = event_limit,
                "Dropping span events over limit"
            );
            span.events.truncate(event_limit);
        }
        span.events = span
            .events
            .into_iter()
            .map(|event| self.sanitize_event(event))
            .collect();

        if span.links.len() > self.limits.links.count {
            tracing::warn!(
                span_id = %span.id,
                received = span.links.len(),
                limit = self.limits.links.count,
                "Dropping span links over limit"
            );
            span.links.truncate(self.limits.links.count);
        }
        span.links = span
            .links
            .into_iter()
            .map(|link| self.sanitize_link(link))
            .collect();

        span
    }

    pub fn sanitize_log(&self, mut log: Log) -> Log {
        log.body = truncate(&log.body, self.limits.logs.body_length).into_owned();
        log.attributes =
            self.sanitize_attributes(log.attributes, self.limits.logs.attribute_count);
        log
    }
}
