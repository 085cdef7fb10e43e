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

//! Job model and lifecycle states.
//!
//! A job is a shell command identified by a caller-supplied key. It moves
//! through a fixed set of states:
//!
//! - `Pending` → `Processing` when a worker leases it;
//! - `Processing` → `Completed` on exit code 0;
//! - `Processing` → `Failed` on failure with retry budget remaining, with a
//!   `next_retry_at` computed from the backoff policy;
//! - `Processing` → `Dead` once `attempts` exceeds `max_retries`;
//! - `Failed` → `Processing` when the retry time arrives and a worker
//!   leases it again;
//! - `Dead` → `Pending` only through an operator revive.
//!
//! `attempts` counts executions *begun* — it is incremented when the lease
//! is taken, not when the outcome is recorded, so a worker crash mid-run
//! still charges the attempt against the retry budget.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job, persisted as lowercase TEXT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    /// Every state, in display order.
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobState::Pending),
            "processing" => Some(JobState::Processing),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "dead" => Some(JobState::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job row decoded into domain types.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    /// Count of executions begun, incremented at lease time.
    pub attempts: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Diagnostic from the most recent failure.
    pub error_message: Option<String>,
    /// When a failed job becomes eligible again.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Worker currently holding the lease, if any.
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether the job carries a lease that is still valid at `now`.
    ///
    /// A lease is valid while the job is `Processing` and `locked_at` is no
    /// older than `lease_ttl`; past that the job is an orphan and the next
    /// lease poll may hand it to another worker.
    pub fn has_valid_lease(&self, now: DateTime<Utc>, lease_ttl: std::time::Duration) -> bool {
        if self.state != JobState::Processing {
            return false;
        }
        let Some(locked_at) = self.locked_at else {
            return false;
        };
        let ttl = chrono::Duration::from_std(lease_ttl).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(locked_at) <= ttl
    }

    /// Whether the job is due for leasing at `now`.
    ///
    /// Pending jobs are always due. Failed jobs become due when their retry
    /// time arrives. A processing job is due again only once its lease has
    /// expired (the holder is presumed crashed); re-leasing it charges
    /// another attempt. Completed and dead jobs are never handed to
    /// workers.
    pub fn is_due(&self, now: DateTime<Utc>, lease_ttl: std::time::Duration) -> bool {
        if self.has_valid_lease(now, lease_ttl) {
            return false;
        }
        match self.state {
            JobState::Pending => true,
            JobState::Failed => self.next_retry_at.map_or(true, |t| t <= now),
            JobState::Processing => true,
            JobState::Completed | JobState::Dead => false,
        }
    }
}

/// A job submission record.
///
/// Everything else on [`Job`] is assigned by the store. Unknown fields are
/// rejected at deserialization time so malformed submissions fail loudly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    pub id: String,
    pub command: String,
    /// Per-job override of the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i32>,
}

impl JobSpec {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}
