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

//! Worker registry operations.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::debug;

use super::models::{NewWorkerRow, WorkerRow};
use super::DAL;
use crate::database::schema::workers;
use crate::database::types::format_timestamp;
use crate::error::QueueError;
use crate::models::worker::{WorkerInfo, WorkerStatus};

pub struct WorkerDal<'a> {
    pub dal: &'a DAL,
}

impl<'a> WorkerDal<'a> {
    /// Registers (or re-registers) a worker as running.
    pub fn register_worker(&self, worker_id: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        let now_s = format_timestamp(now);
        let row = NewWorkerRow {
            worker_id: worker_id.to_string(),
            started_at: now_s.clone(),
            last_heartbeat: now_s,
            status: WorkerStatus::Running.as_str().to_string(),
        };

        let mut conn = self.dal.pool.get()?;
        diesel::replace_into(workers::table)
            .values(&row)
            .execute(&mut conn)?;
        debug!(worker_id, "worker registered");
        Ok(())
    }

    /// Refreshes the worker's heartbeat. Returns false when no row exists
    /// (the caller should re-register).
    pub fn heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> Result<bool, QueueError> {
        let mut conn = self.dal.pool.get()?;
        let updated = diesel::update(workers::table.find(worker_id))
            .set(workers::last_heartbeat.eq(format_timestamp(now)))
            .execute(&mut conn)?;
        Ok(updated > 0)
    }

    /// Moves the worker to the given status without touching `started_at`.
    pub fn set_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut conn = self.dal.pool.get()?;
        diesel::update(workers::table.find(worker_id))
            .set((
                workers::status.eq(status.as_str()),
                workers::last_heartbeat.eq(format_timestamp(now)),
            ))
            .execute(&mut conn)?;
        debug!(worker_id, status = %status, "worker status updated");
        Ok(())
    }

    /// Marks the worker stopped on graceful shutdown.
    pub fn mark_stopped(&self, worker_id: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.set_status(worker_id, WorkerStatus::Stopped, now)
    }

    /// Counts workers that are running with a heartbeat fresher than
    /// `heartbeat_ttl`.
    pub fn active_worker_count(
        &self,
        now: DateTime<Utc>,
        heartbeat_ttl: std::time::Duration,
    ) -> Result<i64, QueueError> {
        let cutoff = heartbeat_cutoff(now, heartbeat_ttl);
        let mut conn = self.dal.pool.get()?;
        let count = workers::table
            .filter(workers::status.eq(WorkerStatus::Running.as_str()))
            .filter(workers::last_heartbeat.ge(cutoff.as_str()))
            .count()
            .get_result(&mut conn)?;
        Ok(count)
    }

    /// Lists workers with a fresh heartbeat, most recently started first.
    pub fn list_active(
        &self,
        now: DateTime<Utc>,
        heartbeat_ttl: std::time::Duration,
    ) -> Result<Vec<WorkerInfo>, QueueError> {
        let cutoff = heartbeat_cutoff(now, heartbeat_ttl);
        let mut conn = self.dal.pool.get()?;
        let rows: Vec<WorkerRow> = workers::table
            .filter(workers::last_heartbeat.ge(cutoff.as_str()))
            .order(workers::started_at.desc())
            .load(&mut conn)?;
        rows.into_iter().map(WorkerInfo::try_from).collect()
    }
}

fn heartbeat_cutoff(now: DateTime<Utc>, heartbeat_ttl: std::time::Duration) -> String {
    let ttl = chrono::Duration::from_std(heartbeat_ttl).unwrap_or(chrono::Duration::MAX);
    format_timestamp(
        now.checked_sub_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
    )
}
