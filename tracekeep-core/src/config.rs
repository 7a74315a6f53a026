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

//! Configuration for Tracekeep
//!
//! Every section has working defaults and can be overridden from TOML.
//! Missing keys fall back to the default of their section.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Event type whose count is limited separately from other session events
pub const BREADCRUMB_EVENT_TYPE: &str = "sys.breadcrumb";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracekeepConfig {
    pub storage: StorageLimits,
    pub attributes: AttributeLimits,
    pub limits: SessionLimits,
    pub upload: UploadOptions,
    pub session: SessionOptions,
    pub logging: LoggingConfig,
}

impl TracekeepConfig {
    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: TracekeepConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Reject settings that would make a component unusable
    pub fn validate(&self) -> Result<()> {
        if self.session.heartbeat_interval_ms == 0 {
            return Err(CoreError::Config(
                "session.heartbeat_interval_ms must be greater than zero".into(),
            ));
        }
        if self.attributes.key_length == 0 || self.attributes.value_length == 0 {
            return Err(CoreError::Config(
                "attribute key and value lengths must be greater than zero".into(),
            ));
        }
        if self.storage.span_limit_per_type == 0 {
            return Err(CoreError::Config(
                "storage.span_limit_per_type must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Row quotas enforced by the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageLimits {
    pub resources_limit: usize,
    pub custom_properties_limit: usize,
    pub persona_tags_limit: usize,
    /// Ceiling on stored spans of one type
    pub span_limit_per_type: usize,
    /// Default row limit when collecting the spans of one session
    pub spans_per_session_limit: usize,
}

impl Default for StorageLimits {
    fn default() -> Self {
        Self {
            resources_limit: 100,
            custom_properties_limit: 100,
            persona_tags_limit: 10,
            span_limit_per_type: 1500,
            spans_per_session_limit: 1500,
        }
    }
}

/// Maximum lengths, in characters, for attribute keys and values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeLimits {
    pub key_length: usize,
    pub value_length: usize,
}

impl Default for AttributeLimits {
    fn default() -> Self {
        Self {
            key_length: 128,
            value_length: 1024,
        }
    }
}

/// Per-session limits on externally supplied signals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    pub custom_spans: SpanLimits,
    pub events: EventLimits,
    pub links: LinkLimits,
    pub logs: LogLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanLimits {
    /// Custom spans allowed per session
    pub count: usize,
    pub name_length: usize,
    pub attribute_count: usize,
}

impl Default for SpanLimits {
    fn default() -> Self {
        Self {
            count: 500,
            name_length: 128,
            attribute_count: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLimits {
    /// Events allowed on a single span
    pub span_event_count: usize,
    /// Events allowed on the session span
    pub session_event_count: usize,
    pub name_length: usize,
    pub attribute_count: usize,
    /// Per event type ceilings on the session span
    pub type_limits: BTreeMap<String, usize>,
}

impl Default for EventLimits {
    fn default() -> Self {
        let mut type_limits = BTreeMap::new();
        type_limits.insert(BREADCRUMB_EVENT_TYPE.to_string(), 100);
        Self {
            span_event_count: 10,
            session_event_count: 500,
            name_length: 128,
            attribute_count: 10,
            type_limits,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkLimits {
    pub count: usize,
    pub attribute_count: usize,
}

impl Default for LinkLimits {
    fn default() -> Self {
        Self {
            count: 10,
            attribute_count: 10,
        }
    }
}

/// Logs allowed per session, by severity bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogLimits {
    pub info: usize,
    pub warning: usize,
    /// Shared by error and fatal logs
    pub error: usize,
    pub attribute_count: usize,
    pub body_length: usize,
}

impl Default for LogLimits {
    fn default() -> Self {
        Self {
            info: 100,
            warning: 100,
            error: 100,
            attribute_count: 50,
            body_length: 4000,
        }
    }
}

/// Upload pipeline options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    pub cache: CacheOptions,
    pub redundancy: RedundancyOptions,
    pub endpoints: EndpointOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Maximum number of cached payloads. 0 disables the cap.
    pub cache_limit: usize,
    /// Age in days after which a payload is dropped. 0 disables the sweep.
    pub cache_days_limit: u32,
    /// Total payload bytes kept. 0 disables the sweep.
    pub cache_size_limit: u64,
    /// Drop every cached payload when the cache opens
    pub reset_cache: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            cache_limit: 0,
            cache_days_limit: 7,
            cache_size_limit: 0,
            reset_cache: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedundancyOptions {
    /// Immediate retries performed within one upload call
    pub automatic_retry_count: u32,
    /// Attempts after which a payload is given up on
    pub maximum_amount_of_retries: u32,
    /// Parallel re-uploads when the cache is swept
    pub concurrent_retries: usize,
    pub backoff: BackoffOptions,
}

impl Default for RedundancyOptions {
    fn default() -> Self {
        Self {
            automatic_retry_count: 0,
            maximum_amount_of_retries: 20,
            concurrent_retries: 2,
            backoff: BackoffOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffOptions {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffOptions {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Collector endpoints, one per upload type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointOptions {
    pub sessions: String,
    pub blobs: String,
    pub logs: String,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            sessions: "https://collector.invalid/v2/spans".into(),
            blobs: "https://collector.invalid/v2/blobs".into(),
            logs: "https://collector.invalid/v2/logs".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub heartbeat_interval_ms: u64,
    /// Sessions starting this long after process launch or sooner are cold starts
    pub cold_start_window_ms: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5000,
            cold_start_window_ms: 5000,
        }
    }
}

impl SessionOptions {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn cold_start_window(&self) -> Duration {
        Duration::from_millis(self.cold_start_window_ms)
    }
}

/// Diagnostic logging of the library itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub default_directive: String,
    /// Emit JSON lines instead of compact text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".into(),
            json: false,
        }
    }
}
