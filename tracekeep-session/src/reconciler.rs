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

//! Startup sweep over data left behind by previous processes
//!
//! Runs once per process before new telemetry flows:
//!
//! 1. spans still open from other processes are closed at this process's
//!    start time
//! 2. closed spans that ended before the oldest stored session are removed
//! 3. sessions without an end time are stamped as terminated, with a crash
//!    report id when the crash reporter has a matching report
//! 4. metadata scoped to other sessions or processes is removed
//! 5. every ended session is handed to the upload pipeline
//! 6. crash reports are cached as blobs, then deleted from the reporter
//! 7. logs of previous processes are cached as one batch, then removed

use crate::crash::{CrashReport, CrashReporter};
use crate::delivery::SessionDelivery;
use crate::error::Result;
use crate::payload::CrashReportPayload;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracekeep_core::{ProcessInfo, SessionId};
use tracekeep_storage::RecordStore;
use tracekeep_upload::UploadType;

/// What a reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub spans_closed: usize,
    pub spans_removed: usize,
    pub sessions_terminated: usize,
    pub sessions_handed_off: usize,
    pub crash_reports_cached: usize,
    pub metadata_removed: usize,
    pub logs_cached: usize,
}

pub struct UnsentDataReconciler {
    delivery: SessionDelivery,
    crash_reporter: Option<Arc<dyn CrashReporter>>,
    process: ProcessInfo,
}

impl UnsentDataReconciler {
    pub fn new(delivery: SessionDelivery, process: ProcessInfo) -> Self {
        Self {
            delivery,
            crash_reporter: None,
            process,
        }
    }

    pub fn with_crash_reporter(mut self, reporter: Arc<dyn CrashReporter>) -> Self {
        self.crash_reporter = Some(reporter);
        self
    }

    fn store(&self) -> &RecordStore {
        self.delivery.store()
    }

    /// Runs the sweep. `current_session` is the session started by this
    /// process, if any; it is left untouched.
    pub async fn run(&self, current_session: Option<&SessionId>) -> Result<ReconcileSummary> {
        let store = self.store();
        let process = &self.process;
        let mut summary = ReconcileSummary {
            spans_closed: store.close_open_spans(process.start_time, &process.id)?,
            ..Default::default()
        };

        // Without any session every closed span of other processes is orphaned.
        let cutoff = store.fetch_oldest_session(None)?.map(|s| s.start_time);
        summary.spans_removed = store.clean_up_spans(cutoff, &process.id)?;

        let reports = self.fetch_crash_reports().await;
        let by_session: HashMap<SessionId, &CrashReport> = reports
            .iter()
            .filter_map(|report| report.session_id.map(|id| (id, report)))
            .collect();

        for mut session in store.fetch_all_sessions()? {
            if Some(&session.id) == current_session {
                continue;
            }
            if !session.is_ended() {
                let crash = by_session.get(&session.id);
                session.end_time = Some(match crash {
                    Some(report) => report.timestamp,
                    None => session.last_heartbeat_time,
                });
                session.app_terminated = true;
                session.crash_report_id = crash.map(|report| report.id.clone());
                session = store.upsert_session(&session)?;
                summary.sessions_terminated += 1;
                tracing::info!(
                    session_id = %session.id,
                    crashed = session.crash_report_id.is_some(),
                    "Stamped unfinished session from a previous process"
                );
            }
            match self.delivery.deliver_session(&session) {
                Ok(_) => summary.sessions_handed_off += 1,
                Err(e) => tracing::warn!(
                    session_id = %session.id,
                    error = %e,
                    "Failed to hand session to upload"
                ),
            }
        }

        summary.metadata_removed = store.clean_metadata(current_session, &process.id)?;
        summary.crash_reports_cached = self.cache_crash_reports(&reports).await;
        summary.logs_cached = self.cache_previous_logs();

        tracing::info!(
            spans_closed = summary.spans_closed,
            spans_removed = summary.spans_removed,
            sessions_terminated = summary.sessions_terminated,
            sessions_handed_off = summary.sessions_handed_off,
            crash_reports = summary.crash_reports_cached,
            metadata_removed = summary.metadata_removed,
            logs = summary.logs_cached,
            "Reconciliation finished"
        );
        Ok(summary)
    }

    async fn fetch_crash_reports(&self) -> Vec<CrashReport> {
        let Some(reporter) = &self.crash_reporter else {
            return Vec::new();
        };
        match reporter.fetch_unsent_reports().await {
            Ok(reports) => reports,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read crash reports");
                Vec::new()
            }
        }
    }

    /// Caches each report as a blob and deletes it from the reporter once
    /// cached. Returns the number of reports cached.
    async fn cache_crash_reports(&self, reports: &[CrashReport]) -> usize {
        let Some(reporter) = &self.crash_reporter else {
            return 0;
        };
        let coordinator = self.delivery.coordinator();
        let mut cached = 0;
        for report in reports {
            let bytes = match CrashReportPayload::from_report(report).to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(report_id = %report.id, error = %e, "Failed to encode crash report");
                    continue;
                }
            };
            if let Err(e) = coordinator.upload(&report.id, UploadType::Blob, bytes) {
                tracing::warn!(report_id = %report.id, error = %e, "Failed to cache crash report");
                continue;
            }
            cached += 1;
            if let Err(e) = reporter.delete_report(&report.id).await {
                tracing::warn!(report_id = %report.id, error = %e, "Failed to delete crash report");
            }
        }
        cached
    }

    fn cache_previous_logs(&self) -> usize {
        let logs = match self
            .store()
            .fetch_logs_excluding_process(&self.process.id, None)
        {
            Ok(logs) => logs,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read logs of previous processes");
                return 0;
            }
        };
        let count = logs.len();
        match self.delivery.deliver_logs(logs) {
            Ok(_) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to cache logs of previous processes");
                0
            }
        }
    }
}
