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

//! A process dies mid-session; the next one reconciles what it left behind

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tracekeep_core::{
    AttributeLimits, Log, LogSeverity, ManualClock, MetadataRecord, MetadataType, ProcessId,
    ProcessInfo, SessionLimits, SessionOptions, SessionState, SignalSanitizer, SignalsLimiter,
    Span, SpanId, SpanType, TraceId, UploadOptions,
};
use tracekeep_session::{
    CrashReport, CrashReporter, SessionController, SessionDelivery, SignalOrigin, SignalRecorder,
    UnsentDataReconciler,
};
use tracekeep_storage::{RecordStore, StorageMechanism, StorageOptions};
use tracekeep_upload::{
    UploadCache, UploadCoordinator, UploadRequest, UploadResponse, UploadType, Uploader,
};

struct Offline;

#[async_trait]
impl Uploader for Offline {
    async fn send(&self, _request: UploadRequest) -> UploadResponse {
        UploadResponse::http_failure(503)
    }
}

#[derive(Default)]
struct MockCrashReporter {
    reports: Mutex<Vec<CrashReport>>,
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl CrashReporter for MockCrashReporter {
    async fn fetch_unsent_reports(&self) -> tracekeep_session::Result<Vec<CrashReport>> {
        Ok(self.reports.lock().clone())
    }

    async fn delete_report(&self, id: &str) -> tracekeep_session::Result<()> {
        self.reports.lock().retain(|r| r.id != id);
        self.deleted.lock().push(id.to_string());
        Ok(())
    }
}

fn launch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

struct Process {
    store: Arc<RecordStore>,
    delivery: SessionDelivery,
    info: ProcessInfo,
}

fn boot(dir: &Path, id: u32, start: DateTime<Utc>) -> Process {
    let store = Arc::new(
        RecordStore::open(StorageOptions::new(StorageMechanism::on_disk(dir, "records"))).unwrap(),
    );
    let options = UploadOptions::default();
    let cache = UploadCache::open(
        StorageMechanism::on_disk(dir, "uploads"),
        options.cache.clone(),
    )
    .unwrap();
    let coordinator = UploadCoordinator::new(Arc::new(cache), Arc::new(Offline), options).unwrap();
    Process {
        delivery: SessionDelivery::new(Arc::clone(&store), coordinator),
        store,
        info: ProcessInfo::new(ProcessId::new(id), start),
    }
}

fn shutdown(process: Process) {
    process.store.close();
    process.delivery.coordinator().cache().close();
}

#[tokio::test]
async fn test_crashed_session_is_terminated_and_resent() {
    let dir = tempdir().unwrap();

    // First process: a session with an open span, a log and scoped metadata.
    let first = boot(dir.path(), 1, launch());
    let old_span = {
        let mut span = Span::new(
            SpanId::random(),
            TraceId::random(),
            "stale",
            SpanType::PERFORMANCE,
            launch() - Duration::days(2),
            first.info.id,
        );
        span.end_time = Some(launch() - Duration::days(1));
        first.store.upsert_span(&span).unwrap()
    };

    let limiter = Arc::new(SignalsLimiter::new(SessionLimits::default()));
    let controller = SessionController::new(
        first.delivery.clone(),
        Arc::clone(&limiter),
        SessionOptions::default(),
        first.info,
        Arc::new(ManualClock::new(launch())),
    );
    let recorder = SignalRecorder::new(
        Arc::clone(&first.store),
        controller.clone(),
        limiter,
        SignalSanitizer::new(SessionLimits::default(), AttributeLimits::default()),
    );

    let session = controller
        .start_session(SessionState::Foreground, launch())
        .unwrap();
    let open_span = recorder
        .record_span(
            Span::new(
                SpanId::random(),
                TraceId::random(),
                "upload-photo",
                SpanType::NETWORK_REQUEST,
                launch() + Duration::seconds(3),
                first.info.id,
            ),
            SignalOrigin::External,
        )
        .unwrap()
        .unwrap();
    recorder
        .record_log(
            Log::new(first.info.id, LogSeverity::Error, "upload failed", launch()),
            SignalOrigin::External,
        )
        .unwrap()
        .unwrap();
    first
        .store
        .add_metadata(&MetadataRecord::for_session(
            "screen",
            "gallery",
            MetadataType::CustomProperty,
            &session.id,
            launch(),
        ))
        .unwrap();
    first
        .store
        .add_metadata(&MetadataRecord::permanent(
            "os.name",
            "iOS",
            MetadataType::RequiredResource,
            launch(),
        ))
        .unwrap();

    // The process dies without ending the session.
    drop(recorder);
    drop(controller);
    shutdown(first);

    // Second process.
    let second_start = launch() + Duration::hours(1);
    let second = boot(dir.path(), 2, second_start);
    let crashed_at = launch() + Duration::minutes(10);
    let reporter = Arc::new(MockCrashReporter::default());
    reporter.reports.lock().push(CrashReport {
        id: "crash-1".into(),
        session_id: Some(session.id),
        timestamp: crashed_at,
        payload: br#"{"signal":"SIGABRT"}"#.to_vec(),
    });

    let reconciler = UnsentDataReconciler::new(second.delivery.clone(), second.info)
        .with_crash_reporter(reporter.clone());
    let summary = reconciler.run(None).await.unwrap();

    assert_eq!(summary.sessions_terminated, 1);
    assert_eq!(summary.crash_reports_cached, 1);
    assert_eq!(summary.logs_cached, 1);

    // Open spans from the dead process are closed at this process's start.
    let span = second
        .store
        .fetch_span(&open_span.id, &open_span.trace_id)
        .unwrap()
        .unwrap();
    assert_eq!(span.end_time, Some(second_start));
    assert!(second
        .store
        .fetch_span(&old_span.id, &old_span.trace_id)
        .unwrap()
        .is_none());

    let stored = second.store.fetch_session(&session.id).unwrap().unwrap();
    assert_eq!(stored.end_time, Some(crashed_at));
    assert!(stored.app_terminated);
    assert_eq!(stored.crash_report_id.as_deref(), Some("crash-1"));

    // Session-scoped metadata is gone; permanent rows stay.
    assert!(second
        .store
        .fetch_all_custom_properties()
        .unwrap()
        .is_empty());
    assert_eq!(second.store.fetch_all_resources().unwrap().len(), 1);

    // Everything waits in the upload cache.
    let cache = second.delivery.coordinator().cache();
    assert!(cache
        .fetch_upload_data(&session.id.to_string(), UploadType::Session)
        .unwrap()
        .is_some());
    assert!(cache
        .fetch_upload_data("crash-1", UploadType::Blob)
        .unwrap()
        .is_some());
    let logs: Vec<_> = cache
        .fetch_all_upload_data()
        .unwrap()
        .into_iter()
        .filter(|r| r.upload_type == UploadType::Log)
        .collect();
    assert_eq!(logs.len(), 1);
    assert_eq!(second.store.log_count().unwrap(), 0);
    assert_eq!(reporter.deleted.lock().as_slice(), &["crash-1".to_string()]);
}

#[tokio::test]
async fn test_unfinished_session_without_crash_ends_at_last_heartbeat() {
    let dir = tempdir().unwrap();
    let first = boot(dir.path(), 1, launch());
    let clock = Arc::new(ManualClock::new(launch()));
    let controller = SessionController::new(
        first.delivery.clone(),
        Arc::new(SignalsLimiter::new(SessionLimits::default())),
        SessionOptions::default(),
        first.info,
        clock.clone(),
    );
    let session = controller
        .start_session(SessionState::Background, launch())
        .unwrap();
    let heartbeat = launch() + Duration::seconds(42);
    clock.set(heartbeat);
    assert!(controller.heartbeat());
    drop(controller);
    shutdown(first);

    let second = boot(dir.path(), 2, launch() + Duration::hours(2));
    let summary = UnsentDataReconciler::new(second.delivery.clone(), second.info)
        .run(None)
        .await
        .unwrap();
    assert_eq!(summary.sessions_terminated, 1);
    assert_eq!(summary.sessions_handed_off, 1);
    assert_eq!(summary.crash_reports_cached, 0);

    let stored = second.store.fetch_session(&session.id).unwrap().unwrap();
    assert_eq!(stored.end_time, Some(heartbeat));
    assert!(stored.app_terminated);
    assert!(stored.crash_report_id.is_none());
}

#[tokio::test]
async fn test_current_session_is_left_alone() {
    let dir = tempdir().unwrap();
    let process = boot(dir.path(), 5, launch());
    let controller = SessionController::new(
        process.delivery.clone(),
        Arc::new(SignalsLimiter::new(SessionLimits::default())),
        SessionOptions::default(),
        process.info,
        Arc::new(ManualClock::new(launch())),
    );
    let session = controller
        .start_session(SessionState::Foreground, launch())
        .unwrap();

    let summary = UnsentDataReconciler::new(process.delivery.clone(), process.info)
        .run(Some(&session.id))
        .await
        .unwrap();
    assert_eq!(summary, Default::default());

    let stored = process.store.fetch_session(&session.id).unwrap().unwrap();
    assert!(!stored.is_ended());
    assert_eq!(controller.current_session_id(), Some(session.id));
}
