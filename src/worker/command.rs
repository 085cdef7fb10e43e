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

//! Subprocess execution for job commands.
//!
//! Commands are tokenized with shell-style word splitting (quotes honored)
//! and executed directly, never through a shell, so metacharacters in job
//! payloads cannot be used for injection. Jobs that need shell features
//! must invoke a shell explicitly. Output is captured into buffers rather
//! than inherited, and a hard wall-clock timeout kills runaways.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::warn;

/// Upper bound on the stderr excerpt embedded in a job's error message.
const STDERR_EXCERPT_MAX: usize = 512;

/// The observable result of running a job command.
#[derive(Debug)]
pub enum CommandOutcome {
    /// The subprocess ran to completion (successfully or not).
    Exited {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// The subprocess exceeded the wall-clock limit and was killed.
    TimedOut { limit: Duration, stderr: String },
    /// The command never produced an exit status: it could not be
    /// tokenized, spawned, or awaited.
    Failed { reason: String },
}

impl CommandOutcome {
    /// The diagnostic to record on the job, or `None` for success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            CommandOutcome::Exited { code: 0, .. } => None,
            CommandOutcome::Exited { code, stderr, .. } => {
                let excerpt = excerpt(stderr);
                if excerpt.is_empty() {
                    Some(format!("command exited with code {code}"))
                } else {
                    Some(format!("command exited with code {code}: {excerpt}"))
                }
            }
            CommandOutcome::TimedOut { limit, stderr } => {
                let excerpt = excerpt(stderr);
                if excerpt.is_empty() {
                    Some(format!("command timed out after {}s", limit.as_secs()))
                } else {
                    Some(format!(
                        "command timed out after {}s: {excerpt}",
                        limit.as_secs()
                    ))
                }
            }
            CommandOutcome::Failed { reason } => Some(reason.clone()),
        }
    }
}

/// Runs `command` with captured output and a hard timeout.
///
/// Never returns an error: every way the command can go wrong is an
/// execution outcome for the retry state machine, not a worker fault.
pub async fn run_command(command: &str, limit: Duration) -> CommandOutcome {
    let argv = match shell_words::split(command) {
        Ok(argv) => argv,
        Err(e) => {
            return CommandOutcome::Failed {
                reason: format!("invalid command line: {e}"),
            };
        }
    };
    let Some((program, args)) = argv.split_first() else {
        return CommandOutcome::Failed {
            reason: "empty command".to_string(),
        };
    };

    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return CommandOutcome::Failed {
                reason: format!("command not found: {program}"),
            };
        }
        Err(e) => {
            return CommandOutcome::Failed {
                reason: format!("failed to spawn command: {e}"),
            };
        }
    };

    // Drain both pipes concurrently with the wait so a chatty child cannot
    // deadlock against a full pipe buffer.
    let stdout_task = drain(child.stdout.take());
    let stderr_task = drain(child.stderr.take());

    match time::timeout(limit, child.wait()).await {
        Ok(Ok(status)) => CommandOutcome::Exited {
            code: status.code().unwrap_or(-1),
            stdout: join_drain(stdout_task).await,
            stderr: join_drain(stderr_task).await,
        },
        Ok(Err(e)) => CommandOutcome::Failed {
            reason: format!("failed to wait for command: {e}"),
        },
        Err(_elapsed) => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill timed-out command");
            }
            CommandOutcome::TimedOut {
                limit,
                stderr: join_drain(stderr_task).await,
            }
        }
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else {
            return String::new();
        };
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn join_drain(task: JoinHandle<String>) -> String {
    task.await.unwrap_or_default()
}

fn excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_EXCERPT_MAX {
        return trimmed.to_string();
    }
    let mut end = STDERR_EXCERPT_MAX;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes total)", &trimmed[..end], trimmed.len())
}
