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

//! Worker Supervisor Module
//!
//! One supervisor serves one worker process. The supervisor is responsible
//! for:
//! - Registering the worker and keeping its heartbeat fresh
//! - Polling for and leasing due jobs
//! - Executing job commands with timeout handling
//! - Recording outcomes through the retry state machine
//! - Shutting down gracefully on interrupt/termination signals
//!
//! Shutdown is cooperative: signals set a flag that is observed between
//! loop iterations, so an in-flight job always runs to completion (or to
//! its own timeout) before the worker exits. Repeated signals do not
//! escalate; the queue has no mechanism to hard-kill a running lease from
//! its own process.
//!
//! Store faults never stop the loop. A failed heartbeat or poll is logged
//! and retried on the next tick; if an outcome cannot be recorded, the
//! job's lease simply expires and another worker picks it up, charging the
//! attempt against the retry budget.

pub mod command;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ConfigService;
use crate::dal::{FailOutcome, DAL};
use crate::database::Database;
use crate::error::{QueueError, WorkerError};
use crate::models::job::Job;
use crate::models::worker::WorkerStatus;
use crate::retry::BackoffPolicy;

use command::run_command;

/// Tunable parameters for a worker supervisor.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when no job is due.
    pub poll_interval: Duration,
    /// Maximum age of a valid lease; older leases are treated as orphaned.
    pub lease_ttl: Duration,
    /// Hard wall-clock limit for a single command execution.
    pub command_timeout: Duration,
    /// Whether to install SIGINT/SIGTERM handlers. Disable when embedding
    /// the supervisor in a process that manages its own signals.
    pub handle_signals: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            lease_ttl: Duration::from_secs(5 * 60),
            command_timeout: Duration::from_secs(5 * 60),
            handle_signals: true,
        }
    }
}

/// Cloneable handle that requests a graceful shutdown of one supervisor.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Asks the supervisor to stop after the current job, if any.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives one worker process: lease, execute, record, repeat.
pub struct WorkerSupervisor {
    dal: DAL,
    config: ConfigService,
    settings: WorkerConfig,
    worker_id: String,
    shutdown: Arc<AtomicBool>,
}

impl WorkerSupervisor {
    /// Creates a supervisor with a fresh host-unique worker id.
    pub fn new(database: Database, settings: WorkerConfig) -> Self {
        let dal = DAL::new(database.pool());
        let config = ConfigService::with_dal(dal.clone());
        Self {
            dal,
            config,
            settings,
            worker_id: format!("worker-{}", Uuid::new_v4()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// A handle for requesting shutdown from outside the supervisor.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    /// Runs the supervisor loop until shutdown is requested.
    pub async fn run(&self) -> Result<(), WorkerError> {
        self.dal
            .workers()
            .register_worker(&self.worker_id, Utc::now())?;
        info!(worker_id = %self.worker_id, "worker started");

        let signal_task = if self.settings.handle_signals {
            Some(self.spawn_signal_listener()?)
        } else {
            None
        };

        while !self.shutdown.load(Ordering::SeqCst) {
            let now = Utc::now();

            match self.dal.workers().heartbeat(&self.worker_id, now) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(worker_id = %self.worker_id, "worker row missing, re-registering");
                    if let Err(e) = self.dal.workers().register_worker(&self.worker_id, now) {
                        error!(worker_id = %self.worker_id, error = %e, "re-registration failed");
                    }
                }
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "heartbeat failed");
                }
            }

            let job = match self
                .dal
                .jobs()
                .lease_next_due(&self.worker_id, now, self.settings.lease_ttl)
            {
                Ok(job) => job,
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "failed to poll for work");
                    tokio::time::sleep(self.settings.poll_interval).await;
                    continue;
                }
            };

            match job {
                Some(job) => {
                    if let Err(e) = self.process_job(&job).await {
                        // A store fault while recording the outcome. The
                        // lease will expire and another worker will retry.
                        error!(
                            worker_id = %self.worker_id,
                            job_id = %job.id,
                            error = %e,
                            "failed to record job outcome"
                        );
                    }
                }
                None => tokio::time::sleep(self.settings.poll_interval).await,
            }
        }

        if let Some(task) = signal_task {
            task.abort();
        }
        self.dal.workers().mark_stopped(&self.worker_id, Utc::now())?;
        info!(worker_id = %self.worker_id, "worker stopped");
        Ok(())
    }

    /// Executes one leased job and records its outcome.
    async fn process_job(&self, job: &Job) -> Result<(), QueueError> {
        info!(
            worker_id = %self.worker_id,
            job_id = %job.id,
            command = %job.command,
            attempt = job.attempts,
            "executing job"
        );

        let outcome = run_command(&job.command, self.settings.command_timeout).await;

        match outcome.error_message() {
            None => match self.dal.jobs().complete_job(&job.id, &self.worker_id) {
                Ok(()) => {
                    info!(worker_id = %self.worker_id, job_id = %job.id, "job completed");
                    Ok(())
                }
                Err(QueueError::NotLeased { .. }) => {
                    warn!(
                        worker_id = %self.worker_id,
                        job_id = %job.id,
                        "lease was lost before completion could be recorded, discarding result"
                    );
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Some(message) => {
                // Read the backoff base at point of use so config changes
                // apply to the very next failure.
                let policy = BackoffPolicy::new(self.config.backoff_base()?);
                match self
                    .dal
                    .jobs()
                    .fail_job(&job.id, &self.worker_id, &message, Utc::now(), &policy)
                {
                    Ok(FailOutcome::RetryScheduled { next_retry_at }) => {
                        warn!(
                            worker_id = %self.worker_id,
                            job_id = %job.id,
                            attempt = job.attempts,
                            error = %message,
                            next_retry_at = %next_retry_at,
                            "job failed, retry scheduled"
                        );
                        Ok(())
                    }
                    Ok(FailOutcome::MovedToDlq) => {
                        error!(
                            worker_id = %self.worker_id,
                            job_id = %job.id,
                            attempts = job.attempts,
                            error = %message,
                            "job exhausted its retry budget, moved to dead letter queue"
                        );
                        Ok(())
                    }
                    Err(QueueError::NotLeased { .. }) => {
                        warn!(
                            worker_id = %self.worker_id,
                            job_id = %job.id,
                            "lease was lost before failure could be recorded, discarding result"
                        );
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Installs interrupt/termination listeners that set the shutdown flag.
    ///
    /// The listeners stay installed for the life of the process, so a
    /// second signal is acknowledged but still does not abort the job in
    /// flight.
    #[cfg(unix)]
    fn spawn_signal_listener(&self) -> Result<JoinHandle<()>, WorkerError> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint =
            signal(SignalKind::interrupt()).map_err(WorkerError::SignalHandler)?;
        let mut sigterm =
            signal(SignalKind::terminate()).map_err(WorkerError::SignalHandler)?;

        let flag = self.shutdown.clone();
        let worker_id = self.worker_id.clone();
        let dal = self.dal.clone();

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
                if flag.swap(true, Ordering::SeqCst) {
                    info!(
                        worker_id = %worker_id,
                        "shutdown already in progress, waiting for current job"
                    );
                } else {
                    info!(
                        worker_id = %worker_id,
                        "received shutdown signal, finishing current job"
                    );
                    if let Err(e) =
                        dal.workers()
                            .set_status(&worker_id, WorkerStatus::Stopping, Utc::now())
                    {
                        warn!(worker_id = %worker_id, error = %e, "failed to record stopping status");
                    }
                }
            }
        }))
    }

    #[cfg(not(unix))]
    fn spawn_signal_listener(&self) -> Result<JoinHandle<()>, WorkerError> {
        let flag = self.shutdown.clone();
        let worker_id = self.worker_id.clone();
        let dal = self.dal.clone();

        Ok(tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                if flag.swap(true, Ordering::SeqCst) {
                    info!(
                        worker_id = %worker_id,
                        "shutdown already in progress, waiting for current job"
                    );
                } else {
                    info!(
                        worker_id = %worker_id,
                        "received shutdown signal, finishing current job"
                    );
                    if let Err(e) =
                        dal.workers()
                            .set_status(&worker_id, WorkerStatus::Stopping, Utc::now())
                    {
                        warn!(worker_id = %worker_id, error = %e, "failed to record stopping status");
                    }
                }
            }
        }))
    }
}
