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

//! Session lifecycle
//!
//! `NoSession -> start -> Active(foreground | background) -> end -> NoSession`
//!
//! The current session and its heartbeat live behind one mutex. Starting a
//! session while another is active ends the active one first. Every start
//! yields a fresh session id.

use crate::delivery::SessionDelivery;
use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracekeep_core::{
    keys, Clock, ProcessInfo, Session, SessionId, SessionOptions, SessionState, SignalsLimiter,
    Span, SpanType,
};
use tracekeep_storage::RecordStore;

/// Name given to the span that mirrors each session
pub const SESSION_SPAN_NAME: &str = "emb-session";

/// Stops the heartbeat task when dropped
struct Heartbeat {
    _stop: oneshot::Sender<()>,
    _task: JoinHandle<()>,
}

#[derive(Default)]
struct ControllerState {
    current: Option<Session>,
    heartbeat: Option<Heartbeat>,
}

struct Inner {
    store: Arc<RecordStore>,
    delivery: SessionDelivery,
    limiter: Arc<SignalsLimiter>,
    clock: Arc<dyn Clock>,
    process: ProcessInfo,
    options: SessionOptions,
    state: Mutex<ControllerState>,
}

/// Owns the current session. Cheap to clone.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        delivery: SessionDelivery,
        limiter: Arc<SignalsLimiter>,
        options: SessionOptions,
        process: ProcessInfo,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Arc::clone(delivery.store()),
                delivery,
                limiter,
                clock,
                process,
                options,
                state: Mutex::new(ControllerState::default()),
            }),
        }
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner.state.lock().current.clone()
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        self.inner.state.lock().current.as_ref().map(|s| s.id)
    }

    pub fn process(&self) -> &ProcessInfo {
        &self.inner.process
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Starts a new session, ending the current one if there is one.
    pub fn start_session(&self, state: SessionState, start_time: DateTime<Utc>) -> Result<Session> {
        let inner = &self.inner;
        let mut guard = inner.state.lock();

        if let Some(previous) = guard.current.take() {
            guard.heartbeat = None;
            self.finish(previous, start_time);
        }

        let mut session = Session::new(SessionId::random(), inner.process.id, state, start_time);
        session.cold_start = self.is_cold_start(start_time);
        let session = inner.store.upsert_session(&session)?;
        inner.store.upsert_span(&session_span(&session))?;
        inner.limiter.reset();

        guard.heartbeat = Some(self.spawn_heartbeat(session.id));
        guard.current = Some(session.clone());
        drop(guard);

        tracing::info!(
            session_id = %session.id,
            state = %session.state,
            cold_start = session.cold_start,
            "Session started"
        );
        Ok(session)
    }

    /// Updates the current session in place. Returns `None` when no session
    /// is active.
    pub fn update(
        &self,
        state: Option<SessionState>,
        app_terminated: Option<bool>,
    ) -> Result<Option<Session>> {
        let inner = &self.inner;
        let mut guard = inner.state.lock();
        let Some(session) = guard.current.as_mut() else {
            return Ok(None);
        };

        if let Some(state) = state {
            if session.state != state {
                session.state = state;
                inner.store.set_span_attribute(
                    &session.span_id,
                    &session.trace_id,
                    keys::STATE,
                    state.as_str(),
                    |_| true,
                )?;
            }
        }
        if let Some(app_terminated) = app_terminated {
            session.app_terminated = app_terminated;
        }
        inner.store.upsert_session(session)?;
        Ok(Some(session.clone()))
    }

    /// Refreshes the heartbeat of the current session. Returns whether a
    /// session was active.
    pub fn heartbeat(&self) -> bool {
        self.inner.heartbeat(None)
    }

    /// Ends the current session and hands it to the upload pipeline.
    ///
    /// Returns the end time, also when no session was active.
    pub fn end_session(&self) -> DateTime<Utc> {
        let now = self.inner.clock.now();
        let previous = {
            let mut guard = self.inner.state.lock();
            guard.heartbeat = None;
            guard.current.take()
        };
        match previous {
            Some(session) => self.finish(session, now),
            None => tracing::debug!("No active session to end"),
        }
        now
    }

    /// Persists the end of `session` and starts its upload. Failures are
    /// logged; the reconciler picks up whatever could not be handed over.
    fn finish(&self, mut session: Session, end_time: DateTime<Utc>) {
        let store = &self.inner.store;
        session.end_time = Some(end_time);
        session.clean_exit = true;

        if let Err(e) = store.upsert_session(&session) {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to persist ended session");
            return;
        }
        if let Err(e) = store.end_span(&session.span_id, &session.trace_id, end_time) {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to end session span");
        }
        match self.inner.delivery.deliver_session(&session) {
            Ok(_) => tracing::info!(session_id = %session.id, "Session ended"),
            Err(e) => tracing::warn!(
                session_id = %session.id,
                error = %e,
                "Session ended but could not be handed to upload"
            ),
        }
    }

    fn is_cold_start(&self, start_time: DateTime<Utc>) -> bool {
        let offset = start_time - self.inner.process.start_time;
        match offset.to_std() {
            // Negative offsets fail the conversion.
            Ok(offset) => offset <= self.inner.options.cold_start_window(),
            Err(_) => false,
        }
    }

    fn spawn_heartbeat(&self, session_id: SessionId) -> Heartbeat {
        let (stop, stopped) = oneshot::channel::<()>();
        let period = self.inner.options.heartbeat_interval();
        let inner = Arc::downgrade(&self.inner);
        let task = self
            .inner
            .delivery
            .coordinator()
            .runtime()
            .spawn(heartbeat_loop(inner, session_id, period, stopped));
        Heartbeat {
            _stop: stop,
            _task: task,
        }
    }
}

impl Inner {
    /// Refreshes the heartbeat if the current session matches `expected`
    /// (any session when `None`).
    fn heartbeat(&self, expected: Option<SessionId>) -> bool {
        let mut guard = self.state.lock();
        let Some(session) = guard.current.as_mut() else {
            return false;
        };
        if expected.is_some_and(|id| id != session.id) {
            return false;
        }
        session.last_heartbeat_time = self.clock.now();
        if let Err(e) = self.store.upsert_session(session) {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to persist heartbeat");
        }
        true
    }
}

async fn heartbeat_loop(
    inner: Weak<Inner>,
    session_id: SessionId,
    period: Duration,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            // Sender dropped: the session ended.
            _ = &mut stopped => {
                tracing::debug!(session_id = %session_id, "Heartbeat stopped");
                return;
            }
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.heartbeat(Some(session_id)) {
            return;
        }
    }
}

fn session_span_attributes(session: &Session) -> tracekeep_core::Attributes {
    [
        (keys::TYPE, SpanType::SESSION.as_str().to_string()),
        (keys::SESSION_ID, session.id.to_string()),
        (keys::STATE, session.state.as_str().to_string()),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect()
}

fn session_span(session: &Session) -> Span {
    let mut span = Span::new(
        session.span_id,
        session.trace_id,
        SESSION_SPAN_NAME,
        SpanType::SESSION,
        session.start_time,
        session.process_id,
    );
    span.session_id = Some(session.id);
    span.attributes = session_span_attributes(session);
    span
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tracekeep_core::{ManualClock, ProcessId, SessionLimits, UploadOptions};
    use tracekeep_storage::StorageMechanism;
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

    fn process_start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn controller(options: SessionOptions) -> (SessionController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(process_start()));
        let store = Arc::new(RecordStore::in_memory().unwrap());
        let upload = UploadOptions::default();
        let cache =
            UploadCache::open(StorageMechanism::in_memory("uploads"), upload.cache.clone()).unwrap();
        let coordinator =
            UploadCoordinator::new(Arc::new(cache), Arc::new(Offline), upload).unwrap();
        let controller = SessionController::new(
            SessionDelivery::new(store, coordinator),
            Arc::new(SignalsLimiter::new(SessionLimits::default())),
            options,
            ProcessInfo::new(ProcessId::new(7), process_start()),
            clock.clone(),
        );
        (controller, clock)
    }

    fn store(controller: &SessionController) -> &Arc<RecordStore> {
        &controller.inner.store
    }

    #[tokio::test]
    async fn test_start_then_end() {
        let (controller, clock) = controller(SessionOptions::default());
        let t0 = process_start() + chrono::Duration::seconds(1);
        let session = controller.start_session(SessionState::Foreground, t0).unwrap();
        assert_eq!(controller.current_session_id(), Some(session.id));

        let t1 = t0 + chrono::Duration::seconds(30);
        clock.set(t1);
        assert_eq!(controller.end_session(), t1);
        assert!(controller.current_session().is_none());

        let stored = store(&controller).fetch_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.end_time, Some(t1));
        assert!(stored.clean_exit);

        // Handed to the upload pipeline.
        let cached = controller.inner.delivery.coordinator().cache();
        assert!(cached
            .fetch_upload_data(&session.id.to_string(), UploadType::Session)
            .unwrap()
            .is_some());

        let span = store(&controller)
            .fetch_span(&session.span_id, &session.trace_id)
            .unwrap()
            .unwrap();
        assert_eq!(span.end_time, Some(t1));
        assert_eq!(span.attributes.get(keys::SESSION_ID), Some(&session.id.to_string()));
    }

    #[tokio::test]
    async fn test_end_without_session_returns_time() {
        let (controller, clock) = controller(SessionOptions::default());
        let now = process_start() + chrono::Duration::seconds(9);
        clock.set(now);
        assert_eq!(controller.end_session(), now);
    }

    #[tokio::test]
    async fn test_every_start_yields_new_session() {
        let (controller, _) = controller(SessionOptions::default());
        let first = controller
            .start_session(SessionState::Foreground, process_start())
            .unwrap();
        let second = controller
            .start_session(SessionState::Background, process_start())
            .unwrap();
        assert_ne!(first.id, second.id);

        // Starting the second ended the first.
        let first = store(&controller).fetch_session(&first.id).unwrap().unwrap();
        assert!(first.is_ended());
        assert_eq!(controller.current_session_id(), Some(second.id));
    }

    #[tokio::test]
    async fn test_cold_start_window() {
        let (controller, _) = controller(SessionOptions {
            cold_start_window_ms: 5000,
            ..SessionOptions::default()
        });
        let at = |ms: i64| process_start() + chrono::Duration::milliseconds(ms);

        assert!(controller.start_session(SessionState::Foreground, at(0)).unwrap().cold_start);
        assert!(controller.start_session(SessionState::Foreground, at(5000)).unwrap().cold_start);
        assert!(!controller.start_session(SessionState::Foreground, at(5001)).unwrap().cold_start);
        assert!(!controller.start_session(SessionState::Foreground, at(-1)).unwrap().cold_start);
    }

    #[tokio::test]
    async fn test_update_mutates_current_session() {
        let (controller, _) = controller(SessionOptions::default());
        assert!(controller.update(Some(SessionState::Background), None).unwrap().is_none());

        let session = controller
            .start_session(SessionState::Foreground, process_start())
            .unwrap();
        let updated = controller
            .update(Some(SessionState::Background), Some(true))
            .unwrap()
            .unwrap();
        assert_eq!(updated.state, SessionState::Background);
        assert!(updated.app_terminated);

        let stored = store(&controller).fetch_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Background);
        let span = store(&controller)
            .fetch_span(&session.span_id, &session.trace_id)
            .unwrap()
            .unwrap();
        assert_eq!(span.attributes.get(keys::STATE).map(String::as_str), Some("background"));
        assert!(span.attributes.contains_key(keys::TYPE));
    }

    #[tokio::test]
    async fn test_manual_heartbeat_persists() {
        let (controller, clock) = controller(SessionOptions::default());
        assert!(!controller.heartbeat());

        let session = controller
            .start_session(SessionState::Foreground, process_start())
            .unwrap();
        let later = process_start() + chrono::Duration::seconds(12);
        clock.set(later);
        assert!(controller.heartbeat());

        let stored = store(&controller).fetch_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.last_heartbeat_time, later);
    }

    #[tokio::test]
    async fn test_heartbeat_task_ticks_and_stops() {
        let (controller, clock) = controller(SessionOptions {
            heartbeat_interval_ms: 10,
            ..SessionOptions::default()
        });
        let session = controller
            .start_session(SessionState::Foreground, process_start())
            .unwrap();
        let later = process_start() + chrono::Duration::seconds(3);
        clock.set(later);

        let mut refreshed = false;
        for _ in 0..200 {
            let stored = store(&controller).fetch_session(&session.id).unwrap().unwrap();
            if stored.last_heartbeat_time == later {
                refreshed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(refreshed, "heartbeat task never refreshed the session");

        controller.end_session();
        let ended = store(&controller).fetch_session(&session.id).unwrap().unwrap();
        clock.set(later + chrono::Duration::seconds(60));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after = store(&controller).fetch_session(&session.id).unwrap().unwrap();
        assert_eq!(after.last_heartbeat_time, ended.last_heartbeat_time);
    }

    #[tokio::test]
    async fn test_concurrent_starts_are_distinct() {
        let (controller, _) = controller(SessionOptions::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let controller = controller.clone();
                std::thread::spawn(move || {
                    controller
                        .start_session(SessionState::Foreground, process_start())
                        .unwrap()
                        .id
                })
            })
            .collect();
        let mut ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        assert_eq!(store(&controller).session_count().unwrap(), 8);
    }
}
