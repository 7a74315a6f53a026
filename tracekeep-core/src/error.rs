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

//! Core error types

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Which limit refused a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    CustomSpan,
    SpanEvent,
    SessionEvent,
    SpanLink,
    SpanAttribute,
    Log,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LimitKind::CustomSpan => "custom span",
            LimitKind::SpanEvent => "span event",
            LimitKind::SessionEvent => "session event",
            LimitKind::SpanLink => "span link",
            LimitKind::SpanAttribute => "span attribute",
            LimitKind::Log => "log",
        };
        f.write_str(name)
    }
}

/// Errors raised by the core model, codec and configuration layers
#[derive(Debug, Error)]
pub enum CoreError {
    /// An attribute column could not be decoded
    #[error("Invalid attribute encoding: {0}")]
    InvalidEncoding(String),

    /// An identifier string could not be parsed
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A stored enum value is not recognized
    #[error("Unknown {kind} value: {value}")]
    UnknownValue { kind: &'static str, value: String },

    /// A count limit refused the signal
    #[error("Limit reached for {0}")]
    LimitReached(LimitKind),

    /// Configuration could not be parsed or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for CoreError {
    fn from(e: toml::de::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}
