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

//! Tracekeep Storage
//!
//! Embedded SQLite persistence for sessions, spans, logs and metadata.
//!
//! ## Guarantees
//!
//! - One serialized writer connection per database, reads on a separate
//!   connection for on-disk stores
//! - Per-type span ceilings with oldest-first eviction on insert
//! - Per-type metadata quotas; required resources are exempt
//! - A corrupted database is deleted and recreated empty so the host keeps
//!   running

pub mod error;
pub mod logs;
pub mod metadata;
pub mod options;
pub mod schema;
pub mod sessions;
pub mod spans;
pub mod sqlite;
pub mod store;

pub use error::{Result, StorageError};
pub use options::{StorageMechanism, StorageOptions};
pub use spans::{SpanWindowQuery, SpanWrite};
pub use sqlite::{Database, Migration, Schema};
pub use store::{RecordStore, StorageStats};
