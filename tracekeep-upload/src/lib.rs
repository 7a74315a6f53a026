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

//! Tracekeep Upload
//!
//! Durable delivery of finished payloads: an SQLite backed [`UploadCache`]
//! and an [`UploadCoordinator`] that drives cached entries to an
//! [`Uploader`] with bounded retries.
//!
//! Delivery is at least once. A payload stays cached until the collector
//! accepts it, rejects it permanently, or it ages out of the cache.

pub mod cache;
pub mod coordinator;
pub mod error;
pub mod retry;
pub mod stats;
pub mod transport;

pub use cache::{UploadCache, UploadDataRecord, UploadType, UPLOAD_CACHE_SCHEMA};
pub use coordinator::{AttemptOutcome, UploadCoordinator};
pub use error::{Result, UploadError};
pub use retry::RetryPolicy;
pub use stats::UploadStats;
pub use transport::{ResponseClass, TransportError, UploadRequest, UploadResponse, Uploader};
