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

//! # queuectl
//!
//! A single-host, persistent background job queue. Clients submit shell
//! commands identified by a caller-supplied key; worker processes lease
//! jobs out of an embedded SQLite store, execute them, and record
//! outcomes. Failures are retried with exponential backoff until the
//! per-job budget runs out, after which the job is parked in the dead
//! letter queue for inspection and optional resubmission.
//!
//! The store is the only shared resource: workers coordinate exclusively
//! through its atomic lease operation, and a worker crash is recovered by
//! lease expiry rather than explicit detection.
//!
//! # Example
//!
//! ```rust,no_run
//! use queuectl::{Database, JobSpec, Queue, WorkerConfig, WorkerSupervisor};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let database = Database::open_default()?;
//!
//! // Submit work.
//! let queue = Queue::new(&database);
//! queue.enqueue(JobSpec::new("report-2026-08", "generate-report --month 2026-08"))?;
//!
//! // Serve work (normally in its own process).
//! let supervisor = WorkerSupervisor::new(database, WorkerConfig::default());
//! supervisor.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dal;
pub mod database;
pub mod error;
pub mod models;
pub mod queue;
pub mod retry;
pub mod worker;

pub use config::{ConfigService, ConfigSnapshot};
pub use dal::{FailOutcome, DAL};
pub use database::Database;
pub use error::{QueueError, WorkerError};
pub use models::job::{Job, JobSpec, JobState};
pub use models::worker::{WorkerInfo, WorkerStatus};
pub use queue::{Queue, QueueStatus};
pub use retry::BackoffPolicy;
pub use worker::{ShutdownHandle, WorkerConfig, WorkerSupervisor};

/// Initializes a `tracing` subscriber for binaries and tests.
///
/// `filter` defaults to `queuectl=info`. Safe to call more than once; only
/// the first call installs a subscriber.
pub fn init_logging(filter: Option<&str>) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or("queuectl=info")));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
