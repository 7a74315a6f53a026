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

//! Tracekeep Core
//!
//! Data model, identifiers and the signal gating primitives shared by the
//! storage, upload and session crates.
//!
//! ## Components
//!
//! - **Model**: sessions, spans (with events and links), logs and metadata
//! - **Codec**: the escaped single-column encoding used for attribute maps
//! - **Sanitizer**: truncation and count capping for untrusted signals
//! - **Limiter**: per-session counters deciding whether a signal may be added
//! - **Config**: TOML-loadable limits and options for every component

pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod ids;
pub mod limiter;
pub mod model;
pub mod sanitize;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{decode_attributes, encode_attributes};
pub use config::{
    AttributeLimits, BackoffOptions, CacheOptions, EndpointOptions, EventLimits, LinkLimits,
    LogLimits, LoggingConfig, RedundancyOptions, SessionLimits, SessionOptions, SpanLimits,
    StorageLimits, TracekeepConfig, UploadOptions, BREADCRUMB_EVENT_TYPE,
};
pub use error::{CoreError, LimitKind, Result};
pub use ids::{LogId, ProcessId, ProcessInfo, SessionId, SpanId, TraceId};
pub use limiter::SignalsLimiter;
pub use model::{
    keys, Attributes, Log, LogSeverity, LogType, MetadataLifespan, MetadataRecord, MetadataType,
    Session, SessionState, Span, SpanEvent, SpanLink, SpanStatus, SpanType,
};
pub use sanitize::SignalSanitizer;

/// Converts a timestamp into the integer microsecond form used by the stores.
pub fn to_micros(time: chrono::DateTime<chrono::Utc>) -> i64 {
    time.timestamp_micros()
}

/// Converts a stored microsecond timestamp back into a `DateTime`.
///
/// Out-of-range values collapse to the Unix epoch instead of failing.
pub fn from_micros(micros: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_micros(micros).unwrap_or_default()
}
