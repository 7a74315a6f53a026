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

//! Upload coordinator
//!
//! Every payload is cached before the first network attempt, so a crash
//! mid-upload only delays delivery. Attempts for the same `(id, type)` are
//! serialized through a per-key lock; different keys upload in parallel.
//!
//! ## Outcomes
//!
//! - success: the cache entry is deleted
//! - retriable failure: the attempt count is incremented and the entry kept,
//!   unless the count reaches the configured maximum
//! - permanent failure: the entry is deleted

use crate::cache::{UploadCache, UploadDataRecord, UploadType};
use crate::error::{Result, UploadError};
use crate::retry::RetryPolicy;
use crate::stats::{UploadStats, UploadStatsInternal};
use crate::transport::{ResponseClass, UploadRequest, Uploader};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracekeep_core::UploadOptions;

/// Result of one or more attempts on a cached payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Accepted by the collector and removed from the cache
    Delivered,
    /// Still cached for a later sweep
    Retained { attempt_count: u32 },
    /// Removed without delivery
    Dropped,
    /// No longer in the cache, another attempt already settled it
    Missing,
}

type KeyLock = Arc<Mutex<()>>;

struct Inner {
    cache: Arc<UploadCache>,
    uploader: Arc<dyn Uploader>,
    options: UploadOptions,
    policy: RetryPolicy,
    runtime: Handle,
    key_locks: DashMap<(String, UploadType), KeyLock>,
    sweeping: AtomicBool,
    retry_slots: Arc<Semaphore>,
    stats: UploadStatsInternal,
}

/// Drives cached payloads to the collector. Cheap to clone.
#[derive(Clone)]
pub struct UploadCoordinator {
    inner: Arc<Inner>,
}

impl UploadCoordinator {
    /// Creates a coordinator on the current tokio runtime.
    pub fn new(
        cache: Arc<UploadCache>,
        uploader: Arc<dyn Uploader>,
        options: UploadOptions,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| UploadError::NoRuntime(e.to_string()))?;
        Ok(Self::with_runtime(cache, uploader, options, runtime))
    }

    pub fn with_runtime(
        cache: Arc<UploadCache>,
        uploader: Arc<dyn Uploader>,
        options: UploadOptions,
        runtime: Handle,
    ) -> Self {
        let policy = RetryPolicy::from(&options.redundancy.backoff);
        let slots = options.redundancy.concurrent_retries.max(1);
        Self {
            inner: Arc::new(Inner {
                cache,
                uploader,
                options,
                policy,
                runtime,
                key_locks: DashMap::new(),
                sweeping: AtomicBool::new(false),
                retry_slots: Arc::new(Semaphore::new(slots)),
                stats: UploadStatsInternal::default(),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<UploadCache> {
        &self.inner.cache
    }

    pub fn options(&self) -> &UploadOptions {
        &self.inner.options
    }

    /// Runtime the upload tasks are spawned on
    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    pub fn stats(&self) -> UploadStats {
        self.inner.stats.snapshot()
    }

    /// Caches `data` and starts uploading it in the background.
    ///
    /// Invalid input is rejected before anything is cached. Once this returns
    /// `Ok` the payload is durable; the handle resolves when the in-call
    /// retries are exhausted or the payload is settled.
    pub fn upload(
        &self,
        id: &str,
        upload_type: UploadType,
        data: Vec<u8>,
    ) -> Result<JoinHandle<Result<AttemptOutcome>>> {
        let record = self.inner.cache.save_upload_data(id, upload_type, &data)?;
        let retries = self.inner.options.redundancy.automatic_retry_count;
        let this = self.clone();
        Ok(self
            .inner
            .runtime
            .spawn(async move { this.send_with_retries(&record.id, record.upload_type, retries).await }))
    }

    /// Performs a single network attempt for a cached payload.
    pub async fn attempt(&self, record: &UploadDataRecord) -> Result<AttemptOutcome> {
        let (outcome, _) = self.attempt_key(&record.id, record.upload_type).await?;
        Ok(outcome)
    }

    /// One attempt plus up to `retries` more while failures stay retriable.
    async fn send_with_retries(
        &self,
        id: &str,
        upload_type: UploadType,
        retries: u32,
    ) -> Result<AttemptOutcome> {
        let mut retry = 0;
        loop {
            let (outcome, retry_after) = self.attempt_key(id, upload_type).await?;
            match outcome {
                AttemptOutcome::Retained { .. } if retry < retries => {
                    let delay = self.inner.policy.delay_for_attempt(retry, retry_after);
                    tracing::debug!(
                        id,
                        upload_type = %upload_type,
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying upload"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                other => return Ok(other),
            }
        }
    }

    async fn attempt_key(
        &self,
        id: &str,
        upload_type: UploadType,
    ) -> Result<(AttemptOutcome, Option<Duration>)> {
        let key = (id.to_string(), upload_type);
        let lock = self
            .inner
            .key_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.attempt_locked(id, upload_type).await
        };

        drop(lock);
        self.inner
            .key_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn attempt_locked(
        &self,
        id: &str,
        upload_type: UploadType,
    ) -> Result<(AttemptOutcome, Option<Duration>)> {
        let inner = &self.inner;
        // Re-read so a settled or updated entry is not sent stale.
        let Some(record) = inner.cache.fetch_upload_data(id, upload_type)? else {
            return Ok((AttemptOutcome::Missing, None));
        };

        let request = UploadRequest::for_record(&record, &inner.options.endpoints);
        UploadStatsInternal::incr(&inner.stats.attempts, 1);
        let response = inner.uploader.send(request).await;

        let outcome = match response.classify() {
            ResponseClass::Success => {
                inner.cache.delete_upload_data(id, upload_type)?;
                UploadStatsInternal::incr(&inner.stats.successes, 1);
                tracing::debug!(id, upload_type = %upload_type, "Upload delivered");
                AttemptOutcome::Delivered
            }
            ResponseClass::Retriable => {
                UploadStatsInternal::incr(&inner.stats.failures, 1);
                let attempt_count = record.attempt_count.saturating_add(1);
                if attempt_count >= inner.options.redundancy.maximum_amount_of_retries {
                    inner.cache.delete_upload_data(id, upload_type)?;
                    UploadStatsInternal::incr(&inner.stats.dropped, 1);
                    tracing::warn!(
                        id,
                        upload_type = %upload_type,
                        attempt_count,
                        "Upload gave up after too many attempts"
                    );
                    AttemptOutcome::Dropped
                } else {
                    inner
                        .cache
                        .update_attempt_count(id, upload_type, attempt_count)?;
                    tracing::warn!(
                        id,
                        upload_type = %upload_type,
                        attempt_count,
                        http_status = ?response.http_status,
                        error = ?response.error,
                        "Upload failed, kept for retry"
                    );
                    AttemptOutcome::Retained { attempt_count }
                }
            }
            ResponseClass::Permanent => {
                UploadStatsInternal::incr(&inner.stats.failures, 1);
                inner.cache.delete_upload_data(id, upload_type)?;
                UploadStatsInternal::incr(&inner.stats.dropped, 1);
                tracing::warn!(
                    id,
                    upload_type = %upload_type,
                    http_status = ?response.http_status,
                    error = ?response.error,
                    "Upload rejected, dropping payload"
                );
                AttemptOutcome::Dropped
            }
        };

        Ok((outcome, response.retry_after))
    }

    /// Sweeps stale entries, then re-attempts every cached payload once in
    /// the background.
    ///
    /// Returns `None` when a sweep is already running. The handle resolves
    /// to the number of payloads delivered.
    pub fn retry_cached_data(&self) -> Option<JoinHandle<usize>> {
        if self.inner.sweeping.swap(true, Ordering::AcqRel) {
            tracing::debug!("Cached data retry already running");
            return None;
        }
        let guard = SweepGuard(Arc::clone(&self.inner));
        let this = self.clone();
        Some(self.inner.runtime.spawn(async move {
            let _guard = guard;
            this.run_sweep().await
        }))
    }

    async fn run_sweep(&self) -> usize {
        let inner = &self.inner;
        match inner.cache.clear_stale_data_if_needed() {
            Ok(evicted) => UploadStatsInternal::incr(&inner.stats.evictions, evicted as u64),
            Err(e) => tracing::warn!(error = %e, "Failed to clear stale cached data"),
        }

        let records = match inner.cache.fetch_all_upload_data() {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read cached uploads");
                return 0;
            }
        };
        if records.is_empty() {
            return 0;
        }
        tracing::info!(pending = records.len(), "Retrying cached uploads");

        let redundancy = &inner.options.redundancy;
        let mut tasks = Vec::with_capacity(records.len());
        for record in records {
            let retries = redundancy.automatic_retry_count.min(
                redundancy
                    .maximum_amount_of_retries
                    .saturating_sub(record.attempt_count),
            );
            let slots = Arc::clone(&inner.retry_slots);
            let this = self.clone();
            tasks.push(inner.runtime.spawn(async move {
                let Ok(_permit) = slots.acquire_owned().await else {
                    return None;
                };
                match this
                    .send_with_retries(&record.id, record.upload_type, retries)
                    .await
                {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        tracing::warn!(id = %record.id, error = %e, "Cached upload failed");
                        None
                    }
                }
            }));
        }

        let mut delivered = 0;
        for task in tasks {
            if let Ok(Some(AttemptOutcome::Delivered)) = task.await {
                delivered += 1;
            }
        }
        tracing::info!(delivered, "Cached upload retry finished");
        delivered
    }
}

struct SweepGuard(Arc<Inner>);

impl Drop for SweepGuard {
    fn drop(&mut self) {
        self.0.sweeping.store(false, Ordering::Release);
    }
}
