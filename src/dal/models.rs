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

//! SQLite row models.
//!
//! These structs use SQLite-native column types (timestamps as RFC 3339
//! TEXT, states as lowercase TEXT) and are converted to domain types at the
//! DAL boundary. A row that fails conversion surfaces as a `CorruptRow`
//! error rather than a panic.

use diesel::prelude::*;

use crate::database::schema::{config, jobs, workers};
use crate::database::types::parse_timestamp;
use crate::error::QueueError;
use crate::models::job::{Job, JobState};
use crate::models::worker::{WorkerInfo, WorkerStatus};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobRow {
    pub id: String,
    pub command: String,
    pub state: String,
    pub attempts: i32,
    pub max_retries: i32,
    pub created_at: String,
    pub updated_at: String,
    pub error_message: Option<String>,
    pub next_retry_at: Option<String>,
    pub locked_by: Option<String>,
    pub locked_at: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJobRow {
    pub id: String,
    pub command: String,
    pub state: String,
    pub attempts: i32,
    pub max_retries: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = workers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WorkerRow {
    pub worker_id: String,
    pub started_at: String,
    pub last_heartbeat: String,
    pub status: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = workers)]
pub struct NewWorkerRow {
    pub worker_id: String,
    pub started_at: String,
    pub last_heartbeat: String,
    pub status: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = config)]
pub struct ConfigRow {
    pub key: String,
    pub value: String,
}

fn corrupt(id: &str, message: impl std::fmt::Display) -> QueueError {
    QueueError::CorruptRow {
        id: id.to_string(),
        message: message.to_string(),
    }
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let state = JobState::parse(&row.state)
            .ok_or_else(|| corrupt(&row.id, format_args!("unknown job state '{}'", row.state)))?;
        let created_at = parse_timestamp(&row.created_at)
            .map_err(|e| corrupt(&row.id, format_args!("bad created_at: {e}")))?;
        let updated_at = parse_timestamp(&row.updated_at)
            .map_err(|e| corrupt(&row.id, format_args!("bad updated_at: {e}")))?;
        let next_retry_at = row
            .next_retry_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(|e| corrupt(&row.id, format_args!("bad next_retry_at: {e}")))?;
        let locked_at = row
            .locked_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(|e| corrupt(&row.id, format_args!("bad locked_at: {e}")))?;

        Ok(Job {
            id: row.id,
            command: row.command,
            state,
            attempts: row.attempts,
            max_retries: row.max_retries,
            created_at,
            updated_at,
            error_message: row.error_message,
            next_retry_at,
            locked_by: row.locked_by,
            locked_at,
        })
    }
}

impl TryFrom<WorkerRow> for WorkerInfo {
    type Error = QueueError;

    fn try_from(row: WorkerRow) -> Result<Self, Self::Error> {
        let status = WorkerStatus::parse(&row.status).ok_or_else(|| {
            corrupt(
                &row.worker_id,
                format_args!("unknown worker status '{}'", row.status),
            )
        })?;
        let started_at = parse_timestamp(&row.started_at)
            .map_err(|e| corrupt(&row.worker_id, format_args!("bad started_at: {e}")))?;
        let last_heartbeat = parse_timestamp(&row.last_heartbeat)
            .map_err(|e| corrupt(&row.worker_id, format_args!("bad last_heartbeat: {e}")))?;

        Ok(WorkerInfo {
            worker_id: row.worker_id,
            started_at,
            last_heartbeat,
            status,
        })
    }
}
