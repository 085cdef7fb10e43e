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

//! The queue facade: the operations submitters and operators call.
//!
//! This layer validates input, delegates to the store, and assembles the
//! status snapshot. It carries no scheduling logic and holds no lease
//! state; everything a front-end needs goes through here.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::config::{ConfigService, ConfigSnapshot};
use crate::dal::DAL;
use crate::database::Database;
use crate::error::QueueError;
use crate::models::job::{Job, JobSpec, JobState};
use crate::models::worker::{WorkerInfo, DEFAULT_HEARTBEAT_TTL};

/// Snapshot of queue health: per-state job counts, live workers, and the
/// current configuration.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub jobs: HashMap<JobState, i64>,
    pub workers: Vec<WorkerInfo>,
    pub config: ConfigSnapshot,
}

impl QueueStatus {
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }
}

/// Client-facing handle to the queue.
#[derive(Clone)]
pub struct Queue {
    dal: DAL,
    config: ConfigService,
}

impl Queue {
    pub fn new(database: &Database) -> Self {
        let dal = DAL::new(database.pool());
        let config = ConfigService::with_dal(dal.clone());
        Self { dal, config }
    }

    /// Submits a new job. The spec's `max_retries` falls back to the
    /// configured default when absent.
    pub fn enqueue(&self, spec: JobSpec) -> Result<Job, QueueError> {
        if spec.id.is_empty() {
            return Err(QueueError::InvalidJobSpec(
                "job id must not be empty".to_string(),
            ));
        }
        if spec.command.trim().is_empty() {
            return Err(QueueError::InvalidJobSpec(
                "command must not be empty".to_string(),
            ));
        }
        if let Some(n) = spec.max_retries {
            if n < 0 {
                return Err(QueueError::InvalidJobSpec(format!(
                    "max_retries must be >= 0, got {n}"
                )));
            }
        }

        let max_retries = match spec.max_retries {
            Some(n) => n,
            None => self.config.max_retries()?,
        };
        let job = self
            .dal
            .jobs()
            .enqueue_job(&spec.id, &spec.command, max_retries, Utc::now())?;
        info!(job_id = %job.id, "job enqueued");
        Ok(job)
    }

    /// Fetches a single job by id.
    pub fn job(&self, id: &str) -> Result<Option<Job>, QueueError> {
        self.dal.jobs().get_by_id(id)
    }

    /// Lists jobs oldest first, optionally filtered by state. Dead jobs are
    /// included in the unfiltered listing.
    pub fn list(
        &self,
        state: Option<JobState>,
        limit: Option<i64>,
    ) -> Result<Vec<Job>, QueueError> {
        self.dal.jobs().list_jobs(state, limit)
    }

    /// Assembles the status snapshot.
    pub fn status(&self) -> Result<QueueStatus, QueueError> {
        let now = Utc::now();
        Ok(QueueStatus {
            jobs: self.dal.jobs().status_counts()?,
            workers: self.dal.workers().list_active(now, DEFAULT_HEARTBEAT_TTL)?,
            config: self.config.snapshot()?,
        })
    }

    /// Lists the dead letter queue, oldest first.
    pub fn dlq_list(&self) -> Result<Vec<Job>, QueueError> {
        self.list(Some(JobState::Dead), None)
    }

    /// Returns a dead job to the queue with a fresh retry budget.
    pub fn dlq_retry(&self, id: &str) -> Result<Job, QueueError> {
        let job = self.dal.jobs().revive_dead(id)?;
        info!(job_id = id, "dead job resubmitted");
        Ok(job)
    }

    /// Deletes a job outright. Operator action; running workers are not
    /// interrupted by it.
    pub fn remove(&self, id: &str) -> Result<bool, QueueError> {
        let removed = self.dal.jobs().delete_job(id)?;
        if removed {
            info!(job_id = id, "job removed");
        }
        Ok(removed)
    }

    /// The configuration service backing this queue.
    pub fn config(&self) -> &ConfigService {
        &self.config
    }
}
