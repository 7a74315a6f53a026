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

//! Hands ended sessions and other finished records to the upload pipeline

use crate::error::{Result, SessionError};
use crate::payload::{LogBatchPayload, SessionPayload};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracekeep_core::{Log, Session};
use tracekeep_storage::RecordStore;
use tracekeep_upload::{AttemptOutcome, UploadCoordinator, UploadType};

/// Builds payloads from the record store and uploads them
#[derive(Clone)]
pub struct SessionDelivery {
    store: Arc<RecordStore>,
    coordinator: UploadCoordinator,
}

impl SessionDelivery {
    pub fn new(store: Arc<RecordStore>, coordinator: UploadCoordinator) -> Self {
        Self { store, coordinator }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &UploadCoordinator {
        &self.coordinator
    }

    /// Caches the payload of an ended session and uploads it.
    ///
    /// The session row is deleted once the upload settles, delivered or
    /// dropped. A retained payload leaves the row in place so the next
    /// reconciliation hands it over again; the cache key is the session id,
    /// so doing so does not duplicate the cached entry.
    pub fn deliver_session(&self, session: &Session) -> Result<JoinHandle<Result<AttemptOutcome>>> {
        let payload = SessionPayload::build(&self.store, session)?;
        let upload = self.coordinator.upload(
            &session.id.to_string(),
            UploadType::Session,
            payload.to_bytes()?,
        )?;
        tracing::debug!(session_id = %session.id, spans = payload.spans.len(), "Session payload cached");

        let store = Arc::clone(&self.store);
        let session_id = session.id;
        Ok(self.coordinator.runtime().spawn(async move {
            let outcome = upload
                .await
                .map_err(|e| SessionError::Task(e.to_string()))??;
            if matches!(outcome, AttemptOutcome::Delivered | AttemptOutcome::Dropped) {
                store.delete_session(&session_id)?;
            }
            Ok::<_, SessionError>(outcome)
        }))
    }

    /// Caches `logs` as one batch, removes them from the store and uploads
    /// the batch. Returns `None` for an empty batch.
    pub fn deliver_logs(&self, logs: Vec<Log>) -> Result<Option<JoinHandle<Result<AttemptOutcome>>>> {
        if logs.is_empty() {
            return Ok(None);
        }
        let ids: Vec<_> = logs.iter().map(|log| log.id).collect();
        let payload = LogBatchPayload::build(&self.store, logs);
        let upload = self.coordinator.upload(
            &payload.batch_id,
            UploadType::Log,
            payload.to_bytes()?,
        )?;
        // The batch is durable in the upload cache now.
        let removed = self.store.remove_logs(&ids)?;
        tracing::debug!(batch_id = %payload.batch_id, removed, "Log batch cached");

        Ok(Some(self.coordinator.runtime().spawn(async move {
            let outcome = upload
                .await
                .map_err(|e| SessionError::Task(e.to_string()))??;
            Ok::<_, SessionError>(outcome)
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tracekeep_core::{LogSeverity, ProcessId, SessionId, SessionState, UploadOptions};
    use tracekeep_storage::StorageMechanism;
    use tracekeep_upload::{UploadCache, UploadRequest, UploadResponse, Uploader};

    struct FixedUploader(u16);

    #[async_trait]
    impl Uploader for FixedUploader {
        async fn send(&self, _request: UploadRequest) -> UploadResponse {
            if self.0 < 300 {
                UploadResponse::success(self.0)
            } else {
                UploadResponse::http_failure(self.0)
            }
        }
    }

    fn base_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn delivery(status: u16) -> SessionDelivery {
        let store = Arc::new(RecordStore::in_memory().unwrap());
        let options = UploadOptions::default();
        let cache = UploadCache::open(StorageMechanism::in_memory("uploads"), options.cache.clone())
            .unwrap();
        let coordinator =
            UploadCoordinator::new(Arc::new(cache), Arc::new(FixedUploader(status)), options)
                .unwrap();
        SessionDelivery::new(store, coordinator)
    }

    fn ended_session(store: &RecordStore) -> Session {
        let mut session = Session::new(
            SessionId::random(),
            ProcessId::new(1),
            SessionState::Foreground,
            base_time(),
        );
        session.end_time = Some(base_time() + chrono::Duration::seconds(30));
        store.upsert_session(&session).unwrap()
    }

    #[tokio::test]
    async fn test_delivered_session_row_is_deleted() {
        let delivery = delivery(200);
        let session = ended_session(delivery.store());

        let outcome = delivery.deliver_session(&session).unwrap().await.unwrap().unwrap();
        assert_eq!(outcome, AttemptOutcome::Delivered);
        assert!(delivery.store().fetch_session(&session.id).unwrap().is_none());
        assert_eq!(delivery.coordinator().cache().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_session_stays_stored_and_cached() {
        let delivery = delivery(503);
        let session = ended_session(delivery.store());

        let outcome = delivery.deliver_session(&session).unwrap().await.unwrap().unwrap();
        assert_eq!(outcome, AttemptOutcome::Retained { attempt_count: 1 });
        assert!(delivery.store().fetch_session(&session.id).unwrap().is_some());

        // Handing it over again reuses the cache entry.
        delivery.deliver_session(&session).unwrap().await.unwrap().unwrap();
        let cached = delivery.coordinator().cache().fetch_all_upload_data().unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].attempt_count, 2);
    }

    #[tokio::test]
    async fn test_log_batch_removes_logs_once_cached() {
        let delivery = delivery(503);
        let process = ProcessId::new(2);
        for i in 0..3 {
            delivery
                .store()
                .create_log(&Log::new(process, LogSeverity::Info, format!("log {}", i), base_time()))
                .unwrap();
        }
        let logs = delivery.store().fetch_all_logs().unwrap();

        let handle = delivery.deliver_logs(logs).unwrap().unwrap();
        assert_eq!(delivery.store().log_count().unwrap(), 0);
        handle.await.unwrap().unwrap();
        let cached = delivery.coordinator().cache().fetch_all_upload_data().unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].upload_type, UploadType::Log);

        assert!(delivery.deliver_logs(Vec::new()).unwrap().is_none());
    }
}
