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

use super::{keys, Attributes};
use crate::error::{CoreError, Result};
use crate::ids::{LogId, ProcessId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Log severity with OpenTelemetry severity numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

text_enum!(LogSeverity, "log severity", {
    Trace => "trace",
    Debug => "debug",
    Info => "info",
    Warn => "warn",
    Error => "error",
    Fatal => "fatal",
});

impl LogSeverity {
    pub fn number(&self) -> i64 {
        match self {
            LogSeverity::Trace => 1,
            LogSeverity::Debug => 5,
            LogSeverity::Info => 9,
            LogSeverity::Warn => 13,
            LogSeverity::Error => 17,
            LogSeverity::Fatal => 21,
        }
    }

    pub fn from_number(number: i64) -> Result<Self> {
        match number {
            1 => Ok(LogSeverity::Trace),
            5 => Ok(LogSeverity::Debug),
            9 => Ok(LogSeverity::Info),
            13 => Ok(LogSeverity::Warn),
            17 => Ok(LogSeverity::Error),
            21 => Ok(LogSeverity::Fatal),
            other => Err(CoreError::UnknownValue {
                kind: "log severity",
                value: other.to_string(),
            }),
        }
    }
}

/// Origin of a log, carried in the `emb.type` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogType {
    /// Logged by the host application
    Message,
    /// Logged by the library about itself
    Internal,
    Crash,
    Hang,
}

text_enum!(LogType, "log type", {
    Message => "sys.log",
    Internal => "sys.internal",
    Crash => "sys.crash",
    Hang => "sys.hang",
});

impl LogType {
    /// Library-originated logs skip limits and sanitization.
    pub fn is_trusted(&self) -> bool {
        !matches!(self, LogType::Message)
    }
}

/// An immutable log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub id: LogId,
    pub process_id: ProcessId,
    pub severity: LogSeverity,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: Attributes,
}

impl Log {
    pub fn new(
        process_id: ProcessId,
        severity: LogSeverity,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LogId::random(),
            process_id,
            severity,
            body: body.into(),
            timestamp,
            attributes: Attributes::new(),
        }
    }

    /// Type from the `emb.type` attribute. Missing or unknown markers are
    /// treated as application messages.
    pub fn log_type(&self) -> LogType {
        self.attributes
            .get(keys::TYPE)
            .and_then(|value| value.parse().ok())
            .unwrap_or(LogType::Message)
    }

    pub fn set_log_type(&mut self, log_type: LogType) {
        self.attributes
            .insert(keys::TYPE.to_string(), log_type.as_str().to_string());
    }
}
