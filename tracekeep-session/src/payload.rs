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

//! Upload payloads built from stored records
//!
//! Metadata lookups are fail-soft: when the store has no rows for a session
//! (unknown id, or the store was recreated after corruption) the payload is
//! still built, with every resource field left empty.

use crate::crash::CrashReport;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracekeep_core::{Log, MetadataRecord, Session, SessionState, Span};
use tracekeep_storage::RecordStore;
use uuid::Uuid;

/// Well known resource keys
pub mod resource_keys {
    pub const APP_VERSION: &str = "app.version";
    pub const APP_BUNDLE_ID: &str = "app.bundle_id";
    pub const OS_NAME: &str = "os.name";
    pub const OS_VERSION: &str = "os.version";
    pub const DEVICE_MODEL: &str = "device.model";
    pub const SDK_VERSION: &str = "sdk.version";
    pub const ENVIRONMENT: &str = "environment";
}

/// Resource fields attached to every payload. All fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourcePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_bundle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Resources without a dedicated field
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ResourcePayload {
    pub fn from_records(records: &[MetadataRecord]) -> Self {
        use resource_keys::*;

        let mut payload = Self::default();
        for record in records {
            let value = Some(record.value.clone());
            match record.key.as_str() {
                APP_VERSION => payload.app_version = value,
                APP_BUNDLE_ID => payload.app_bundle_id = value,
                OS_NAME => payload.os_name = value,
                OS_VERSION => payload.os_version = value,
                DEVICE_MODEL => payload.device_model = value,
                SDK_VERSION => payload.sdk_version = value,
                ENVIRONMENT => payload.environment = value,
                other => {
                    payload.extra.insert(other.to_string(), record.value.clone());
                }
            }
        }
        payload
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionPayload {
    pub session_id: String,
    pub process_id: String,
    pub trace_id: String,
    pub state: SessionState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_heartbeat_time: DateTime<Utc>,
    pub cold_start: bool,
    pub clean_exit: bool,
    pub app_terminated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_report_id: Option<String>,
    pub spans: Vec<Span>,
    pub resource: ResourcePayload,
    pub properties: BTreeMap<String, String>,
    pub persona_tags: Vec<String>,
}

impl SessionPayload {
    /// Collects the spans and metadata recorded during `session`.
    pub fn build(store: &RecordStore, session: &Session) -> Result<Self> {
        let spans = store.fetch_spans_for_session(session, false, None)?;
        let resources = fail_soft(store.fetch_resources_for_session_id(&session.id), "resources");
        let properties =
            fail_soft(store.fetch_custom_properties_for_session_id(&session.id), "properties");
        let persona_tags =
            fail_soft(store.fetch_persona_tags_for_session_id(&session.id), "persona tags");

        Ok(Self {
            session_id: session.id.to_string(),
            process_id: session.process_id.hex(),
            trace_id: session.trace_id.to_string(),
            state: session.state,
            start_time: session.start_time,
            end_time: session.end_time,
            last_heartbeat_time: session.last_heartbeat_time,
            cold_start: session.cold_start,
            clean_exit: session.clean_exit,
            app_terminated: session.app_terminated,
            crash_report_id: session.crash_report_id.clone(),
            spans,
            resource: ResourcePayload::from_records(&resources),
            properties: properties
                .into_iter()
                .map(|record| (record.key, record.value))
                .collect(),
            persona_tags: persona_tags.into_iter().map(|record| record.key).collect(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A batch of logs from one process
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogBatchPayload {
    pub batch_id: String,
    pub logs: Vec<Log>,
    pub resource: ResourcePayload,
}

impl LogBatchPayload {
    pub fn build(store: &RecordStore, logs: Vec<Log>) -> Self {
        let resources = match logs.first() {
            Some(log) => fail_soft(
                store.fetch_resources_for_process_id(&log.process_id),
                "resources",
            ),
            None => Vec::new(),
        };
        Self {
            batch_id: Uuid::new_v4().to_string(),
            logs,
            resource: ResourcePayload::from_records(&resources),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrashReportPayload {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// The report itself, embedded as JSON when it parses as JSON
    pub report: serde_json::Value,
}

impl CrashReportPayload {
    pub fn from_report(report: &CrashReport) -> Self {
        let body = serde_json::from_slice(&report.payload).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&report.payload).into_owned())
        });
        Self {
            id: report.id.clone(),
            session_id: report.session_id.map(|id| id.to_string()),
            timestamp: report.timestamp,
            report: body,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn fail_soft<T>(result: tracekeep_storage::Result<Vec<T>>, what: &'static str) -> Vec<T> {
    result.unwrap_or_else(|e| {
        tracing::warn!(error = %e, what, "Metadata lookup failed, building payload without it");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracekeep_core::{
        LogSeverity, MetadataType, ProcessId, SessionId, SpanId, SpanType, TraceId,
    };

    fn base_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_empty_resources_yield_empty_fields() {
        let payload = ResourcePayload::from_records(&[]);
        assert_eq!(payload, ResourcePayload::default());
        assert_eq!(serde_json::to_string(&payload).unwrap(), "{}");
    }

    #[test]
    fn test_unknown_session_builds_payload_without_metadata() {
        let store = RecordStore::in_memory().unwrap();
        store
            .add_metadata(&MetadataRecord::permanent(
                resource_keys::OS_NAME,
                "iOS",
                MetadataType::RequiredResource,
                base_time(),
            ))
            .unwrap();

        // Never persisted.
        let session = Session::new(
            SessionId::random(),
            ProcessId::new(1),
            SessionState::Foreground,
            base_time(),
        );
        let payload = SessionPayload::build(&store, &session).unwrap();
        assert_eq!(payload.resource, ResourcePayload::default());
        assert!(payload.properties.is_empty());
        assert!(payload.to_bytes().is_ok());
    }

    #[test]
    fn test_session_payload_collects_spans_and_metadata() {
        let store = RecordStore::in_memory().unwrap();
        let process = ProcessId::new(1);
        let mut session =
            Session::new(SessionId::random(), process, SessionState::Foreground, base_time());
        session.end_time = Some(base_time() + chrono::Duration::seconds(60));
        store.upsert_session(&session).unwrap();

        let span = Span::new(
            SpanId::random(),
            TraceId::random(),
            "checkout",
            SpanType::PERFORMANCE,
            base_time() + chrono::Duration::seconds(5),
            process,
        );
        store.upsert_span(&span).unwrap();
        store
            .add_metadata(&MetadataRecord::permanent(
                resource_keys::APP_VERSION,
                "2.1.0",
                MetadataType::Resource,
                base_time(),
            ))
            .unwrap();
        store
            .add_metadata(&MetadataRecord::for_session(
                "plan",
                "pro",
                MetadataType::CustomProperty,
                &session.id,
                base_time(),
            ))
            .unwrap();
        store
            .add_metadata(&MetadataRecord::for_session(
                "beta_user",
                "beta_user",
                MetadataType::PersonaTag,
                &session.id,
                base_time(),
            ))
            .unwrap();

        let payload = SessionPayload::build(&store, &session).unwrap();
        assert_eq!(payload.spans.len(), 1);
        assert_eq!(payload.resource.app_version.as_deref(), Some("2.1.0"));
        assert_eq!(payload.properties.get("plan").map(String::as_str), Some("pro"));
        assert_eq!(payload.persona_tags, vec!["beta_user".to_string()]);
    }

    #[test]
    fn test_crash_payload_embeds_json_or_text() {
        let mut report = CrashReport {
            id: "crash-1".into(),
            session_id: None,
            timestamp: base_time(),
            payload: br#"{"signal":"SIGSEGV"}"#.to_vec(),
        };
        let payload = CrashReportPayload::from_report(&report);
        assert_eq!(payload.report["signal"], "SIGSEGV");

        report.payload = b"not json".to_vec();
        let payload = CrashReportPayload::from_report(&report);
        assert_eq!(payload.report, serde_json::Value::String("not json".into()));
    }

    #[test]
    fn test_log_batch_uses_process_resources() {
        let store = RecordStore::in_memory().unwrap();
        let process = ProcessId::new(9);
        store
            .add_metadata(&MetadataRecord::for_process(
                resource_keys::ENVIRONMENT,
                "staging",
                MetadataType::Resource,
                &process,
                base_time(),
            ))
            .unwrap();
        let logs = vec![Log::new(process, LogSeverity::Warn, "low disk", base_time())];
        let payload = LogBatchPayload::build(&store, logs);
        assert_eq!(payload.resource.environment.as_deref(), Some("staging"));
        assert_eq!(payload.logs.len(), 1);
    }
}
