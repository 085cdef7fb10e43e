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

//! Error types for the queue library.
//!
//! The taxonomy separates client input errors (duplicate ids, malformed
//! specs, bad configuration values), lease errors (a worker reporting an
//! outcome for a job it no longer holds), and store faults (pool, database,
//! and migration failures). Execution failures of the commands themselves
//! are never errors at this level; they are recorded on the job row and
//! drive the retry state machine.

use thiserror::Error;

/// Errors surfaced by the store, the queue facade, and the configuration
/// service.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A job with the same id already exists in the store.
    #[error("job id '{0}' already exists")]
    DuplicateJobId(String),

    /// The submitted job specification failed validation.
    #[error("invalid job spec: {0}")]
    InvalidJobSpec(String),

    /// A completion or failure report arrived from a worker that no longer
    /// holds the job's lease.
    #[error("job '{id}' is not leased by worker '{worker_id}'")]
    NotLeased { id: String, worker_id: String },

    /// A revive was requested for a job that is not in the dead letter queue.
    #[error("job '{0}' is not in the dead letter queue")]
    NotDead(String),

    /// No job with the given id exists.
    #[error("job '{0}' not found")]
    JobNotFound(String),

    /// An unknown configuration key or an unparseable value was supplied.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A persisted row could not be decoded into its domain type.
    #[error("corrupt row for job '{id}': {message}")]
    CorruptRow { id: String, message: String },

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    ConnectionPool(#[from] diesel::r2d2::PoolError),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("failed to prepare database location: {0}")]
    DatabaseLocation(String),
}

/// Errors surfaced by the worker supervisor.
///
/// Store faults observed mid-loop are logged and retried on the next tick
/// rather than returned; this type covers the failures that prevent the
/// supervisor from starting or stopping cleanly.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("failed to install signal handler: {0}")]
    SignalHandler(#[source] std::io::Error),
}
