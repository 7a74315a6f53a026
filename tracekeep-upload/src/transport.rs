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

//! Network uploader contract
//!
//! The coordinator never talks to the network itself. It hands an
//! [`UploadRequest`] to an [`Uploader`] and classifies the
//! [`UploadResponse`] it gets back.

use crate::cache::{UploadDataRecord, UploadType};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracekeep_core::EndpointOptions;

/// Transport level failure reported by an [`Uploader`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request cancelled")]
    Cancelled,
    #[error("bad url")]
    BadUrl,
    #[error("unsupported url")]
    UnsupportedUrl,
    #[error("authentication required")]
    Authentication,
    #[error("secure connection failed")]
    SecureConnection,
    #[error("server certificate rejected")]
    Certificate,
    #[error("dns lookup failed")]
    DnsLookup,
    #[error("request timed out")]
    Timeout,
    #[error("network connection lost")]
    ConnectionLost,
    #[error("not connected to the internet")]
    NotConnected,
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether sending the same request again could succeed.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            TransportError::Cancelled
                | TransportError::BadUrl
                | TransportError::UnsupportedUrl
                | TransportError::Authentication
                | TransportError::SecureConnection
                | TransportError::Certificate
                | TransportError::DnsLookup
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub endpoint: String,
    pub id: String,
    pub upload_type: UploadType,
    pub data: Vec<u8>,
    /// Previous attempts, sent to the collector as a retry count header
    pub attempt_count: u32,
}

impl UploadRequest {
    pub fn for_record(record: &UploadDataRecord, endpoints: &EndpointOptions) -> Self {
        let endpoint = match record.upload_type {
            UploadType::Session => &endpoints.sessions,
            UploadType::Blob => &endpoints.blobs,
            UploadType::Log => &endpoints.logs,
        };
        Self {
            endpoint: endpoint.clone(),
            id: record.id.clone(),
            upload_type: record.upload_type,
            data: record.data.clone(),
            attempt_count: record.attempt_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UploadResponse {
    pub success: bool,
    pub http_status: Option<u16>,
    pub error: Option<TransportError>,
    /// Server supplied delay before the next try
    pub retry_after: Option<Duration>,
}

/// How a response should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    Retriable,
    Permanent,
}

impl UploadResponse {
    pub fn success(http_status: u16) -> Self {
        Self {
            success: true,
            http_status: Some(http_status),
            ..Default::default()
        }
    }

    pub fn http_failure(http_status: u16) -> Self {
        Self {
            http_status: Some(http_status),
            ..Default::default()
        }
    }

    pub fn transport_failure(error: TransportError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn classify(&self) -> ResponseClass {
        if self.success {
            return ResponseClass::Success;
        }
        if let Some(error) = &self.error {
            return if error.is_retriable() {
                ResponseClass::Retriable
            } else {
                ResponseClass::Permanent
            };
        }
        match self.http_status {
            Some(429) | Some(500..=599) => ResponseClass::Retriable,
            Some(400..=499) => ResponseClass::Permanent,
            // Unknown outcome, keep the payload.
            _ => ResponseClass::Retriable,
        }
    }
}

/// Sends one payload to the collector.
///
/// Implementations own timeouts and connection handling. A call must
/// resolve exactly once per request.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn send(&self, request: UploadRequest) -> UploadResponse;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(UploadResponse::success(200).classify(), ResponseClass::Success);
        assert_eq!(UploadResponse::http_failure(429).classify(), ResponseClass::Retriable);
        assert_eq!(UploadResponse::http_failure(503).classify(), ResponseClass::Retriable);
        assert_eq!(UploadResponse::http_failure(400).classify(), ResponseClass::Permanent);
        assert_eq!(UploadResponse::http_failure(413).classify(), ResponseClass::Permanent);
        assert_eq!(
            UploadResponse::transport_failure(TransportError::Timeout).classify(),
            ResponseClass::Retriable
        );
        assert_eq!(
            UploadResponse::transport_failure(TransportError::Certificate).classify(),
            ResponseClass::Permanent
        );
        assert_eq!(UploadResponse::default().classify(), ResponseClass::Retriable);
    }

    #[test]
    fn test_request_picks_endpoint_by_type() {
        let endpoints = EndpointOptions::default();
        let record = UploadDataRecord {
            id: "x".into(),
            upload_type: UploadType::Log,
            data: vec![1, 2],
            attempt_count: 4,
            date: chrono::Utc::now(),
        };
        let request = UploadRequest::for_record(&record, &endpoints);
        assert_eq!(request.endpoint, endpoints.logs);
        assert_eq!(request.attempt_count, 4);
    }
}
