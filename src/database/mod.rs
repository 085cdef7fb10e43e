/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Database connection management for the embedded SQLite store.
//!
//! This module provides a connection pool over a single SQLite database
//! file, shared by every worker process and client process on the host.
//! Connections are configured for multi-process access: WAL journaling so
//! readers never block the single writer, `synchronous = NORMAL`, and a
//! 5-second busy timeout so brief write contention resolves by waiting
//! instead of failing.
//!
//! The default database location is `${HOME}/.queuectl/queuectl.db`; the
//! directory is created on first use with user-only permissions. Any other
//! path (including `:memory:` and temp dirs in tests) can be opened with
//! [`Database::open`].
//!
//! # Example
//!
//! ```rust,no_run
//! use queuectl::database::Database;
//!
//! let db = Database::open("/tmp/queuectl-demo.db").expect("open database");
//! let pool = db.pool();
//! ```

pub mod schema;
pub mod types;

use std::path::{Path, PathBuf};

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::{debug, info};

use crate::error::QueueError;

/// Embedded schema migrations, applied on every [`Database`] open.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Type alias for the connection pool.
pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// Type alias for a pooled connection.
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Default number of pooled connections per process.
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Applies the per-connection pragmas required for concurrent access.
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL; \
             PRAGMA busy_timeout = 5000; \
             PRAGMA foreign_keys = ON;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// A pool of connections to the embedded queue database.
///
/// The struct is `Clone` and can be shared freely; each clone references
/// the same underlying pool. Migrations are run once at open time, so a
/// freshly opened database is always at the current schema.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    path: PathBuf,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Opens (creating if necessary) the database at the default location,
    /// `${HOME}/.queuectl/queuectl.db`.
    pub fn open_default() -> Result<Self, QueueError> {
        let path = default_database_path()?;
        Self::open(path)
    }

    /// Opens (creating if necessary) the database at `path` and runs any
    /// pending migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        let manager = ConnectionManager::<SqliteConnection>::new(path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(DEFAULT_POOL_SIZE)
            .connection_customizer(Box::new(ConnectionOptions))
            .build(manager)?;

        let mut conn = pool.get()?;
        run_migrations(&mut conn)?;
        debug!(path = %path.display(), "database opened");

        Ok(Self { pool, path })
    }

    /// Returns a clone of the connection pool.
    pub fn pool(&self) -> DbPool {
        self.pool.clone()
    }

    /// The filesystem path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Runs all pending migrations on the given connection.
pub fn run_migrations(conn: &mut SqliteConnection) -> Result<(), QueueError> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| QueueError::Migration(e.to_string()))?;
    if !applied.is_empty() {
        info!(count = applied.len(), "applied schema migrations");
    }
    Ok(())
}

/// Resolves `${HOME}/.queuectl/queuectl.db`, creating the directory with
/// user-only permissions on first use.
fn default_database_path() -> Result<PathBuf, QueueError> {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| QueueError::DatabaseLocation("HOME is not set".to_string()))?;
    let dir = home.join(".queuectl");
    create_private_dir(&dir)?;
    Ok(dir.join("queuectl.db"))
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<(), QueueError> {
    use std::os::unix::fs::DirBuilderExt;

    if dir.is_dir() {
        return Ok(());
    }
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(|e| QueueError::DatabaseLocation(format!("{}: {e}", dir.display())))
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<(), QueueError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| QueueError::DatabaseLocation(format!("{}: {e}", dir.display())))
}
