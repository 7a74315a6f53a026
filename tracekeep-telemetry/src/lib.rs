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

//! Tracekeep telemetry (diagnostic logging + counters).
//!
//! The library reports on itself through `tracing`. Hosts that have no
//! subscriber of their own can install one with [`init_logging`].

use serde::Serialize;
use tracekeep_core::LoggingConfig;
use tracekeep_storage::{RecordStore, StorageStats};
use tracekeep_upload::{UploadCoordinator, UploadStats};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` wins over the configured default directive. Returns
/// `Ok(false)` when a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.default_directive)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(true))
            .try_init()
    };
    Ok(installed.is_ok())
}

/// Point-in-time view of the store and the upload pipeline
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub storage: ComponentHealth<StorageStats>,
    pub uploads: UploadStats,
    pub cache: ComponentHealth<CacheStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
}

/// Stats of one component, or why they could not be read
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth<T> {
    pub healthy: bool,
    pub message: Option<String>,
    pub stats: Option<T>,
}

impl<T> ComponentHealth<T> {
    pub fn healthy(stats: T) -> Self {
        Self {
            healthy: true,
            message: None,
            stats: Some(stats),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: Some(message.into()),
            stats: None,
        }
    }
}

impl TelemetrySnapshot {
    pub fn collect(store: &RecordStore, coordinator: &UploadCoordinator) -> Self {
        let storage = match store.stats() {
            Ok(stats) => ComponentHealth::healthy(stats),
            Err(e) => ComponentHealth::unhealthy(e.to_string()),
        };
        let cache = coordinator.cache();
        let cache = match (cache.count(), cache.total_size()) {
            (Ok(entries), Ok(bytes)) => ComponentHealth::healthy(CacheStats { entries, bytes }),
            (Err(e), _) | (_, Err(e)) => ComponentHealth::unhealthy(e.to_string()),
        };
        Self {
            storage,
            uploads: coordinator.stats(),
            cache,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracekeep_core::UploadOptions;
    use tracekeep_storage::StorageMechanism;
    use tracekeep_upload::{UploadCache, UploadRequest, UploadResponse, UploadType, Uploader};

    struct Accepting;

    #[async_trait::async_trait]
    impl Uploader for Accepting {
        async fn send(&self, _request: UploadRequest) -> UploadResponse {
            UploadResponse::success(200)
        }
    }

    #[test]
    fn test_init_logging_twice_is_not_an_error() {
        let config = LoggingConfig::default();
        init_logging(&config).unwrap();
        assert!(!init_logging(&config).unwrap());
    }

    #[test]
    fn test_invalid_directive_is_rejected_without_rust_log() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            default_directive: "tracekeep=loud".into(),
            json: true,
        };
        assert!(init_logging(&config).is_err());
    }

    #[tokio::test]
    async fn test_snapshot_reports_store_and_cache() {
        let store = RecordStore::in_memory().unwrap();
        let options = UploadOptions::default();
        let cache =
            UploadCache::open(StorageMechanism::in_memory("uploads"), options.cache.clone()).unwrap();
        let coordinator =
            UploadCoordinator::new(Arc::new(cache), Arc::new(Accepting), options).unwrap();
        coordinator
            .cache()
            .save_upload_data("a", UploadType::Blob, &[0u8; 16])
            .unwrap();

        let snapshot = TelemetrySnapshot::collect(&store, &coordinator);
        assert!(snapshot.storage.healthy);
        assert_eq!(
            snapshot.cache.stats,
            Some(CacheStats {
                entries: 1,
                bytes: 16
            })
        );

        store.close();
        let snapshot = TelemetrySnapshot::collect(&store, &coordinator);
        assert!(!snapshot.storage.healthy);
        assert!(snapshot.to_json().unwrap().contains("\"healthy\":false"));
    }
}
