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

//! Tracekeep Session
//!
//! Decides when records move from the store to the upload pipeline.
//!
//! - [`SessionController`] owns the current session, its heartbeat and the
//!   span mirroring it, and hands each ended session to upload
//! - [`SignalRecorder`] gates spans, events and logs through the limiter
//!   and the sanitizer before they are stored
//! - [`UnsentDataReconciler`] repairs what a previous process left behind
//!   and re-sends anything not yet delivered

pub mod controller;
pub mod crash;
pub mod delivery;
pub mod error;
pub mod payload;
pub mod reconciler;
pub mod signals;

pub use controller::{SessionController, SESSION_SPAN_NAME};
pub use crash::{CrashReport, CrashReporter};
pub use delivery::SessionDelivery;
pub use error::{Result, SessionError};
pub use payload::{CrashReportPayload, LogBatchPayload, ResourcePayload, SessionPayload};
pub use reconciler::{ReconcileSummary, UnsentDataReconciler};
pub use signals::{SignalOrigin, SignalRecorder};
