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

//! Records kept by the store
//!
//! Each entity has its own table, so the set of record types is closed:
//! sessions, spans (owning their events and links), logs and metadata.

pub use log::{Log, LogSeverity, LogType};
pub use metadata::{MetadataLifespan, MetadataRecord, MetadataType};
pub use session::{Session, SessionState};
pub use span::{Span, SpanEvent, SpanLink, SpanStatus, SpanType};

use std::collections::BTreeMap;

/// Ordered attribute map
pub type Attributes = BTreeMap<String, String>;

/// Attribute keys injected by the library itself
pub mod keys {
    /// Type marker for spans, events and logs
    pub const TYPE: &str = "emb.type";
    /// Session the signal was recorded in
    pub const SESSION_ID: &str = "session.id";
    /// Foreground or background state of the session
    pub const STATE: &str = "emb.state";

    /// Keys exempt from attribute count limits
    pub const PROTECTED: [&str; 3] = [TYPE, SESSION_ID, STATE];

    pub fn is_protected(key: &str) -> bool {
        PROTECTED.contains(&key)
    }
}

// Must precede the submodules so they can invoke it.
/// Implements `as_str` and `FromStr` for a fieldless enum stored as text.
macro_rules! text_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = crate::error::CoreError;

            fn from_str(s: &str) -> crate::error::Result<Self> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(crate::error::CoreError::UnknownValue {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

mod log;
mod metadata;
mod session;
mod span;
