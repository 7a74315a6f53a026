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

//! Store location and open options

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracekeep_core::StorageLimits;

/// Where a database lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageMechanism {
    /// Private in-memory database, gone when closed
    InMemory { name: String },
    /// `<base_dir>/<name>.sqlite` in WAL mode
    OnDisk { base_dir: PathBuf, name: String },
}

impl StorageMechanism {
    pub fn in_memory(name: impl Into<String>) -> Self {
        StorageMechanism::InMemory { name: name.into() }
    }

    pub fn on_disk(base_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        StorageMechanism::OnDisk {
            base_dir: base_dir.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            StorageMechanism::InMemory { name } | StorageMechanism::OnDisk { name, .. } => name,
        }
    }

    /// Database file path, `None` for in-memory stores
    pub fn file_path(&self) -> Option<PathBuf> {
        match self {
            StorageMechanism::InMemory { .. } => None,
            StorageMechanism::OnDisk { base_dir, name } => {
                Some(base_dir.join(format!("{}.sqlite", name)))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageOptions {
    pub mechanism: StorageMechanism,
    #[serde(default)]
    pub limits: StorageLimits,
    /// Wipe and recreate the store once if a migration fails
    #[serde(default)]
    pub reset_if_error: bool,
}

impl StorageOptions {
    pub fn new(mechanism: StorageMechanism) -> Self {
        Self {
            mechanism,
            limits: StorageLimits::default(),
            reset_if_error: true,
        }
    }

    pub fn with_limits(mut self, limits: StorageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_reset_if_error(mut self, reset_if_error: bool) -> Self {
        self.reset_if_error = reset_if_error;
        self
    }
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self::new(StorageMechanism::in_memory("tracekeep"))
    }
}
