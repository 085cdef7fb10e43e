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

//! Data Access Layer for the queue store.
//!
//! Every mutation of persistent state goes through this layer. Writes that
//! must be atomic with respect to concurrent worker processes (leasing,
//! outcome recording, revival) run inside IMMEDIATE transactions so the
//! write lock is taken up front and concurrent callers serialize instead of
//! racing between their reads and writes.

use diesel::result::Error as DieselError;

use crate::database::DbPool;

pub mod config;
pub mod job;
pub mod models;
pub mod worker;

pub use job::FailOutcome;

use config::ConfigDal;
use job::JobDal;
use worker::WorkerDal;

/// The main Data Access Layer struct.
#[derive(Clone)]
pub struct DAL {
    /// A connection pool for the embedded database.
    pub pool: DbPool,
}

impl DAL {
    /// Creates a new DAL instance with the provided connection pool.
    pub fn new(pool: DbPool) -> Self {
        DAL { pool }
    }

    /// Returns a JobDal instance for job table operations.
    pub fn jobs(&self) -> JobDal<'_> {
        JobDal { dal: self }
    }

    /// Returns a WorkerDal instance for worker registry operations.
    pub fn workers(&self) -> WorkerDal<'_> {
        WorkerDal { dal: self }
    }

    /// Returns a ConfigDal instance for config table operations.
    pub fn config(&self) -> ConfigDal<'_> {
        ConfigDal { dal: self }
    }
}

/// Whether an error is transient SQLite lock contention worth retrying.
pub(crate) fn is_lock_contention(err: &DieselError) -> bool {
    matches!(err, DieselError::DatabaseError(_, info)
        if info.message().contains("database is locked")
            || info.message().contains("database table is locked"))
}
