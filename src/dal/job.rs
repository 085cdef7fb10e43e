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

//! Job table operations: enqueue, lease, outcome recording, revival.
//!
//! The lease is the concurrency-critical operation. SQLite has no
//! `FOR UPDATE SKIP LOCKED`, so leasing runs in an IMMEDIATE transaction:
//! the write lock is acquired before the candidate row is selected, which
//! serializes concurrent lease attempts and guarantees each eligible job is
//! handed to exactly one worker. Transient lock contention is retried a
//! bounded number of times on top of the connection-level busy timeout.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::debug;

use super::models::{JobRow, NewJobRow};
use super::{is_lock_contention, DAL};
use crate::database::schema::jobs;
use crate::database::types::format_timestamp;
use crate::error::QueueError;
use crate::models::job::{Job, JobState};
use crate::retry::BackoffPolicy;

/// How a recorded failure was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The job still has retry budget; it will become eligible again at the
    /// given time.
    RetryScheduled { next_retry_at: DateTime<Utc> },
    /// The retry budget is exhausted; the job is parked in the dead letter
    /// queue.
    MovedToDlq,
}

/// Bounded retry for writes that lose a lock race despite the busy timeout.
const LOCK_RETRIES: u32 = 3;

pub struct JobDal<'a> {
    pub dal: &'a DAL,
}

impl<'a> JobDal<'a> {
    /// Inserts a new job in state `pending`.
    pub fn enqueue_job(
        &self,
        id: &str,
        command: &str,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<Job, QueueError> {
        if command.trim().is_empty() {
            return Err(QueueError::InvalidJobSpec(
                "command must not be empty".to_string(),
            ));
        }
        if max_retries < 0 {
            return Err(QueueError::InvalidJobSpec(format!(
                "max_retries must be >= 0, got {max_retries}"
            )));
        }

        let now_s = format_timestamp(now);
        let row = NewJobRow {
            id: id.to_string(),
            command: command.to_string(),
            state: JobState::Pending.as_str().to_string(),
            attempts: 0,
            max_retries,
            created_at: now_s.clone(),
            updated_at: now_s,
        };

        let mut conn = self.dal.pool.get()?;
        match diesel::insert_into(jobs::table).values(&row).execute(&mut conn) {
            Ok(_) => {}
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                return Err(QueueError::DuplicateJobId(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        debug!(job_id = id, max_retries, "job enqueued");
        let inserted: JobRow = jobs::table.find(id).first(&mut conn)?;
        Job::try_from(inserted)
    }

    /// Fetches a single job by id.
    pub fn get_by_id(&self, id: &str) -> Result<Option<Job>, QueueError> {
        let mut conn = self.dal.pool.get()?;
        let row: Option<JobRow> = jobs::table.find(id).first(&mut conn).optional()?;
        row.map(Job::try_from).transpose()
    }

    /// Atomically leases the oldest due job for `worker_id`.
    ///
    /// A job is due when it is `pending`, or `failed` with its retry time
    /// reached, or still `processing` under a lease older than `lease_ttl`
    /// (the owner is presumed crashed). In every case the job must not be
    /// validly leased by someone else. The winning job moves to
    /// `processing` with `attempts` incremented and the lock fields set to
    /// this worker.
    ///
    /// Returns `None` when no job is due. Two concurrent callers never
    /// receive the same job.
    pub fn lease_next_due(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<Option<Job>, QueueError> {
        let mut attempt = 0;
        loop {
            match self.lease_once(worker_id, now, lease_ttl) {
                Err(QueueError::Database(ref e))
                    if is_lock_contention(e) && attempt < LOCK_RETRIES =>
                {
                    attempt += 1;
                    debug!(worker_id, attempt, "lease hit lock contention, retrying");
                    std::thread::sleep(Duration::from_millis(50 * u64::from(attempt)));
                }
                other => return other,
            }
        }
    }

    fn lease_once(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<Option<Job>, QueueError> {
        let now_s = format_timestamp(now);

        let mut conn = self.dal.pool.get()?;
        conn.immediate_transaction(|conn| -> Result<Option<Job>, QueueError> {
            // The query narrows to states that can become due; whether a
            // row actually is due (retry time reached, lease expired) is
            // `Job::is_due`, so the eligibility rules live in one place.
            let candidates: Vec<JobRow> = jobs::table
                .filter(jobs::state.eq_any([
                    JobState::Pending.as_str(),
                    JobState::Failed.as_str(),
                    JobState::Processing.as_str(),
                ]))
                .order((jobs::created_at.asc(), jobs::id.asc()))
                .load(conn)?;

            for row in candidates {
                let job = Job::try_from(row)?;
                if !job.is_due(now, lease_ttl) {
                    continue;
                }

                diesel::update(jobs::table.find(&job.id))
                    .set((
                        jobs::state.eq(JobState::Processing.as_str()),
                        jobs::attempts.eq(job.attempts + 1),
                        jobs::locked_by.eq(Some(worker_id)),
                        jobs::locked_at.eq(Some(now_s.as_str())),
                        jobs::updated_at.eq(now_s.as_str()),
                    ))
                    .execute(conn)?;

                let leased: JobRow = jobs::table.find(&job.id).first(conn)?;
                debug!(
                    worker_id,
                    job_id = %leased.id,
                    attempt = leased.attempts,
                    "job leased"
                );
                return Job::try_from(leased).map(Some);
            }
            Ok(None)
        })
    }

    /// Records a successful execution.
    ///
    /// Only the worker holding the lease may complete a job; anyone else
    /// gets `NotLeased` (their lease expired and the job moved on).
    pub fn complete_job(&self, id: &str, worker_id: &str) -> Result<(), QueueError> {
        let now_s = format_timestamp(Utc::now());
        let mut conn = self.dal.pool.get()?;

        let updated = diesel::update(
            jobs::table
                .find(id)
                .filter(jobs::state.eq(JobState::Processing.as_str()))
                .filter(jobs::locked_by.eq(worker_id)),
        )
        .set((
            jobs::state.eq(JobState::Completed.as_str()),
            jobs::error_message.eq(None::<String>),
            jobs::locked_by.eq(None::<String>),
            jobs::locked_at.eq(None::<String>),
            jobs::updated_at.eq(now_s.as_str()),
        ))
        .execute(&mut conn)?;

        if updated == 0 {
            return Err(QueueError::NotLeased {
                id: id.to_string(),
                worker_id: worker_id.to_string(),
            });
        }
        debug!(worker_id, job_id = id, "job completed");
        Ok(())
    }

    /// Records a failed execution and resolves it through the retry state
    /// machine.
    ///
    /// `attempts` already includes the attempt that just failed (it was
    /// incremented at lease time), so a job whose `attempts` still fits the
    /// budget is rescheduled with backoff and anything past the budget goes
    /// to the dead letter queue.
    pub fn fail_job(
        &self,
        id: &str,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
        policy: &BackoffPolicy,
    ) -> Result<FailOutcome, QueueError> {
        let now_s = format_timestamp(now);
        let mut conn = self.dal.pool.get()?;

        conn.immediate_transaction(|conn| -> Result<FailOutcome, QueueError> {
            let not_leased = || QueueError::NotLeased {
                id: id.to_string(),
                worker_id: worker_id.to_string(),
            };

            let row: JobRow = jobs::table
                .find(id)
                .first(conn)
                .optional()?
                .ok_or_else(not_leased)?;
            if row.state != JobState::Processing.as_str()
                || row.locked_by.as_deref() != Some(worker_id)
            {
                return Err(not_leased());
            }

            if row.attempts <= row.max_retries {
                let delay = chrono::Duration::from_std(policy.delay(row.attempts))
                    .unwrap_or(chrono::Duration::MAX);
                let next_retry_at = now
                    .checked_add_signed(delay)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);

                diesel::update(jobs::table.find(id))
                    .set((
                        jobs::state.eq(JobState::Failed.as_str()),
                        jobs::error_message.eq(Some(error)),
                        jobs::next_retry_at.eq(Some(format_timestamp(next_retry_at))),
                        jobs::locked_by.eq(None::<String>),
                        jobs::locked_at.eq(None::<String>),
                        jobs::updated_at.eq(now_s.as_str()),
                    ))
                    .execute(conn)?;

                debug!(
                    worker_id,
                    job_id = id,
                    attempt = row.attempts,
                    next_retry_at = %next_retry_at,
                    "job failed, retry scheduled"
                );
                Ok(FailOutcome::RetryScheduled { next_retry_at })
            } else {
                diesel::update(jobs::table.find(id))
                    .set((
                        jobs::state.eq(JobState::Dead.as_str()),
                        jobs::error_message.eq(Some(error)),
                        jobs::next_retry_at.eq(None::<String>),
                        jobs::locked_by.eq(None::<String>),
                        jobs::locked_at.eq(None::<String>),
                        jobs::updated_at.eq(now_s.as_str()),
                    ))
                    .execute(conn)?;

                debug!(
                    worker_id,
                    job_id = id,
                    attempts = row.attempts,
                    "retry budget exhausted, job moved to dead letter queue"
                );
                Ok(FailOutcome::MovedToDlq)
            }
        })
    }

    /// Returns a dead job to `pending` with a fresh retry budget.
    pub fn revive_dead(&self, id: &str) -> Result<Job, QueueError> {
        let now_s = format_timestamp(Utc::now());
        let mut conn = self.dal.pool.get()?;

        conn.immediate_transaction(|conn| -> Result<Job, QueueError> {
            let updated = diesel::update(
                jobs::table
                    .find(id)
                    .filter(jobs::state.eq(JobState::Dead.as_str())),
            )
            .set((
                jobs::state.eq(JobState::Pending.as_str()),
                jobs::attempts.eq(0),
                jobs::error_message.eq(None::<String>),
                jobs::next_retry_at.eq(None::<String>),
                jobs::locked_by.eq(None::<String>),
                jobs::locked_at.eq(None::<String>),
                jobs::updated_at.eq(now_s.as_str()),
            ))
            .execute(conn)?;

            if updated == 0 {
                let exists: Option<JobRow> = jobs::table.find(id).first(conn).optional()?;
                return match exists {
                    Some(_) => Err(QueueError::NotDead(id.to_string())),
                    None => Err(QueueError::JobNotFound(id.to_string())),
                };
            }

            debug!(job_id = id, "dead job revived");
            let row: JobRow = jobs::table.find(id).first(conn)?;
            Job::try_from(row)
        })
    }

    /// Lists jobs, optionally filtered by state, oldest first.
    pub fn list_jobs(
        &self,
        state: Option<JobState>,
        limit: Option<i64>,
    ) -> Result<Vec<Job>, QueueError> {
        let mut conn = self.dal.pool.get()?;
        let mut query = jobs::table.into_boxed();
        if let Some(state) = state {
            query = query.filter(jobs::state.eq(state.as_str()));
        }
        query = query.order((jobs::created_at.asc(), jobs::id.asc()));
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        let rows: Vec<JobRow> = query.load(&mut conn)?;
        rows.into_iter().map(Job::try_from).collect()
    }

    /// Counts jobs per state; every state is present in the result, zero
    /// filled.
    pub fn status_counts(&self) -> Result<HashMap<JobState, i64>, QueueError> {
        let mut conn = self.dal.pool.get()?;
        let rows: Vec<(String, i64)> = jobs::table
            .group_by(jobs::state)
            .select((jobs::state, diesel::dsl::count_star()))
            .load(&mut conn)?;

        let mut counts: HashMap<JobState, i64> =
            JobState::ALL.into_iter().map(|s| (s, 0)).collect();
        for (state, count) in rows {
            if let Some(state) = JobState::parse(&state) {
                counts.insert(state, count);
            }
        }
        Ok(counts)
    }

    /// Deletes a job outright. Operator-level escape hatch; the queue
    /// machinery itself never deletes rows.
    pub fn delete_job(&self, id: &str) -> Result<bool, QueueError> {
        let mut conn = self.dal.pool.get()?;
        let deleted = diesel::delete(jobs::table.find(id)).execute(&mut conn)?;
        Ok(deleted > 0)
    }
}
