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

//! SQLite database handle shared by the record store and the upload cache.
//!
//! All mutations go through one writer connection. On-disk databases get a
//! second read-only connection so reads run alongside writes (WAL mode).
//! When the engine reports corruption the files are deleted, the database
//! is recreated empty and the operation is retried once. Recovery discards
//! every record, including writes acknowledged before the damage was seen.
//! Operations that hit the same damage concurrently share one recovery.

use crate::error::{Result, StorageError};
use crate::options::StorageMechanism;
use parking_lot::{Mutex, RwLock};
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, Row};
use std::path::Path;
use std::str::FromStr;
use tracekeep_core::{decode_attributes, Attributes, CoreError};

/// A schema migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Schema version after this migration is applied
    pub version: i32,
    pub description: &'static str,
    /// Idempotent upgrade SQL, may be empty
    pub up_sql: &'static str,
}

/// Base tables plus ordered migrations, tracked with `PRAGMA user_version`
#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    /// Full schema created on a fresh database
    pub base_sql: &'static str,
    pub migrations: &'static [Migration],
}

impl Schema {
    pub fn version(&self) -> i32 {
        self.migrations.last().map(|m| m.version).unwrap_or(0)
    }
}

struct Handles {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
    /// Bumped each time the files are recreated
    generation: u64,
}

/// An operation error with the handle generation it ran against
struct Failure {
    error: StorageError,
    generation: u64,
}

impl From<Failure> for StorageError {
    fn from(failure: Failure) -> Self {
        failure.error
    }
}

pub struct Database {
    mechanism: StorageMechanism,
    schema: &'static Schema,
    handles: RwLock<Option<Handles>>,
}

impl Database {
    /// Opens or creates the database and brings its schema up to date.
    ///
    /// A corrupted file is always replaced. A failed migration replaces the
    /// file only when `reset_if_error` is set, otherwise the error is returned.
    pub fn open(
        mechanism: StorageMechanism,
        schema: &'static Schema,
        reset_if_error: bool,
    ) -> Result<Self> {
        let handles = match open_handles(&mechanism, schema, 0) {
            Ok(handles) => handles,
            Err(e) if e.is_corruption() => {
                tracing::warn!(
                    store = mechanism.name(),
                    error = %e,
                    "Database corrupted on open, recreating"
                );
                wipe(&mechanism)?;
                open_handles(&mechanism, schema, 0)?
            }
            Err(e @ StorageError::Migration { .. }) if reset_if_error => {
                tracing::warn!(
                    store = mechanism.name(),
                    error = %e,
                    "Migration failed, resetting store"
                );
                wipe(&mechanism)?;
                open_handles(&mechanism, schema, 0)?
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            store = mechanism.name(),
            version = schema.version(),
            "Database opened"
        );

        Ok(Self {
            mechanism,
            schema,
            handles: RwLock::new(Some(handles)),
        })
    }

    pub fn mechanism(&self) -> &StorageMechanism {
        &self.mechanism
    }

    /// Runs `f` on the writer connection.
    pub fn write<T>(&self, mut f: impl FnMut(&mut Connection) -> Result<T>) -> Result<T> {
        match self.with_writer(&mut f) {
            Err(failure) if failure.error.is_corruption() => {
                self.recover(&failure.error, failure.generation)?;
                Ok(self.with_writer(&mut f)?)
            }
            other => Ok(other?),
        }
    }

    /// Runs `f` on the reader connection, or the writer if there is none.
    pub fn read<T>(&self, mut f: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        match self.with_reader(&mut f) {
            Err(failure) if failure.error.is_corruption() => {
                self.recover(&failure.error, failure.generation)?;
                Ok(self.with_reader(&mut f)?)
            }
            other => Ok(other?),
        }
    }

    fn with_writer<T>(
        &self,
        f: &mut impl FnMut(&mut Connection) -> Result<T>,
    ) -> std::result::Result<T, Failure> {
        let handles = self.handles.read();
        let handles = handles.as_ref().ok_or(Failure {
            error: StorageError::Closed,
            generation: 0,
        })?;
        let mut conn = handles.writer.lock();
        f(&mut conn).map_err(|error| Failure {
            error,
            generation: handles.generation,
        })
    }

    fn with_reader<T>(
        &self,
        f: &mut impl FnMut(&Connection) -> Result<T>,
    ) -> std::result::Result<T, Failure> {
        let handles = self.handles.read();
        let handles = handles.as_ref().ok_or(Failure {
            error: StorageError::Closed,
            generation: 0,
        })?;
        let result = match &handles.reader {
            Some(reader) => f(&reader.lock()),
            None => f(&handles.writer.lock()),
        };
        result.map_err(|error| Failure {
            error,
            generation: handles.generation,
        })
    }

    /// Deletes the database and recreates it with an empty schema.
    ///
    /// `seen` is the generation the failing operation ran against. If the
    /// files were already recreated since then nothing is deleted, so writes
    /// made after the first recovery survive.
    /// Records read before recovery no longer match any stored row.
    fn recover(&self, cause: &StorageError, seen: u64) -> Result<()> {
        let mut handles = self.handles.write();
        let generation = match handles.as_ref() {
            None => return Err(StorageError::Closed),
            Some(current) if current.generation != seen => {
                tracing::debug!(
                    store = self.mechanism.name(),
                    generation = current.generation,
                    "Database already recovered"
                );
                return Ok(());
            }
            Some(current) => current.generation + 1,
        };
        tracing::warn!(
            store = self.mechanism.name(),
            error = %cause,
            "Database corrupted, recreating empty store"
        );
        // Drop the connections before deleting their files.
        *handles = None;
        wipe(&self.mechanism)?;
        *handles = Some(open_handles(&self.mechanism, self.schema, generation)?);
        tracing::info!(store = self.mechanism.name(), generation, "Database recovered");
        Ok(())
    }

    /// Closes all connections. Later calls fail with [`StorageError::Closed`].
    pub fn close(&self) {
        if self.handles.write().take().is_some() {
            tracing::debug!(store = self.mechanism.name(), "Database closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.handles.read().is_none()
    }
}

fn open_handles(
    mechanism: &StorageMechanism,
    schema: &Schema,
    generation: u64,
) -> Result<Handles> {
    match mechanism.file_path() {
        None => {
            let mut conn = Connection::open_in_memory()?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            initialize_schema(&mut conn, schema)?;
            Ok(Handles {
                writer: Mutex::new(conn),
                reader: None,
                generation,
            })
        }
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut writer = Connection::open(&path)?;
            apply_pragmas(&writer)?;
            initialize_schema(&mut writer, schema)?;

            let reader = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            reader.busy_timeout(std::time::Duration::from_secs(5))?;

            Ok(Handles {
                writer: Mutex::new(writer),
                reader: Some(Mutex::new(reader)),
                generation,
            })
        }
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::warn!(mode = %mode, "WAL journal mode unavailable");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

fn wipe(mechanism: &StorageMechanism) -> Result<()> {
    let Some(path) = mechanism.file_path() else {
        return Ok(());
    };
    for suffix in ["", "-wal", "-shm"] {
        let file = format!("{}{}", path.display(), suffix);
        remove_if_exists(Path::new(&file))?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn user_version(conn: &Connection) -> Result<i32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Creates the base schema on a fresh database, then applies pending
/// migrations in order. Each migration commits together with its version.
pub fn initialize_schema(conn: &mut Connection, schema: &Schema) -> Result<()> {
    let current = user_version(conn)?;
    let target = schema.version();

    if current > target {
        return Err(StorageError::Migration {
            version: current,
            message: format!(
                "{} schema version {} is newer than supported {}",
                schema.name, current, target
            ),
        });
    }
    if current == target {
        return Ok(());
    }

    if current == 0 {
        conn.execute_batch(schema.base_sql)
            .map_err(|e| classify_migration_error(0, e))?;
    }

    for migration in schema.migrations {
        if migration.version <= current {
            continue;
        }
        let tx = conn
            .transaction()
            .map_err(|e| classify_migration_error(migration.version, e))?;
        if !migration.up_sql.is_empty() {
            tx.execute_batch(migration.up_sql)
                .map_err(|e| classify_migration_error(migration.version, e))?;
        }
        tx.pragma_update(None, "user_version", migration.version)
            .map_err(|e| classify_migration_error(migration.version, e))?;
        tx.commit()
            .map_err(|e| classify_migration_error(migration.version, e))?;

        tracing::info!(
            schema = schema.name,
            version = migration.version,
            description = migration.description,
            "Applied schema migration"
        );
    }
    Ok(())
}

/// Corruption keeps its engine error so callers can recover from it.
fn classify_migration_error(version: i32, e: rusqlite::Error) -> StorageError {
    let err = StorageError::Sqlite(e);
    if err.is_corruption() {
        return err;
    }
    StorageError::Migration {
        version,
        message: err.to_string(),
    }
}

/// Parses a text column with a `FromStr` implementation from the core model.
pub fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = CoreError>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn parse_optional_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = CoreError>,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        t.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Decodes an attribute column written with the attribute codec.
pub fn attributes_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Attributes> {
    let text: String = row.get(idx)?;
    decode_attributes(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
