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

//! Crash reporter contract

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracekeep_core::SessionId;

/// A crash report captured by a previous process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub id: String,
    /// Session that was current when the crash happened, if known
    pub session_id: Option<SessionId>,
    pub timestamp: DateTime<Utc>,
    pub payload: Vec<u8>,
}

/// Source of crash reports that have not been sent yet.
///
/// Polled once at startup by the reconciler.
#[async_trait]
pub trait CrashReporter: Send + Sync {
    async fn fetch_unsent_reports(&self) -> Result<Vec<CrashReport>>;

    /// Forgets a report once its payload is safely cached.
    async fn delete_report(&self, id: &str) -> Result<()>;
}
