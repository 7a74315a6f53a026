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

use crate::ids::{ProcessId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetadataType {
    Resource,
    /// Library-owned resource, exempt from quotas and bulk removal
    RequiredResource,
    CustomProperty,
    PersonaTag,
}

text_enum!(MetadataType, "metadata type", {
    Resource => "resource",
    RequiredResource => "requiredResource",
    CustomProperty => "customProperty",
    PersonaTag => "personaTag",
});

/// Scope in which a metadata row stays visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataLifespan {
    Session,
    Process,
    Permanent,
}

text_enum!(MetadataLifespan, "metadata lifespan", {
    Session => "session",
    Process => "process",
    Permanent => "permanent",
});

/// Key/value metadata, unique on `(key, kind, lifespan, lifespan_id)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub key: String,
    pub value: String,
    pub kind: MetadataType,
    pub lifespan: MetadataLifespan,
    /// Session id or process id for scoped rows, empty for permanent rows
    pub lifespan_id: String,
    pub collected_at: DateTime<Utc>,
}

impl MetadataRecord {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        kind: MetadataType,
        lifespan: MetadataLifespan,
        lifespan_id: impl Into<String>,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind,
            lifespan,
            lifespan_id: lifespan_id.into(),
            collected_at,
        }
    }

    pub fn for_session(
        key: impl Into<String>,
        value: impl Into<String>,
        kind: MetadataType,
        session_id: &SessionId,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            key,
            value,
            kind,
            MetadataLifespan::Session,
            session_id.to_string(),
            collected_at,
        )
    }

    pub fn for_process(
        key: impl Into<String>,
        value: impl Into<String>,
        kind: MetadataType,
        process_id: &ProcessId,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            key,
            value,
            kind,
            MetadataLifespan::Process,
            process_id.hex(),
            collected_at,
        )
    }

    pub fn permanent(
        key: impl Into<String>,
        value: impl Into<String>,
        kind: MetadataType,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self::new(key, value, kind, MetadataLifespan::Permanent, "", collected_at)
    }
}
