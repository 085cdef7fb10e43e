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

//! Store-level tests for enqueue, lease, outcome recording, and revival.
//!
//! Most tests drive `lease_next_due` with explicit `now` values instead of
//! sleeping, so retry eligibility and lease expiry are exercised without
//! wall-clock waits.

use std::sync::{Arc, Barrier};
use std::time::Duration;

use chrono::Utc;
use queuectl::{BackoffPolicy, FailOutcome, JobState, QueueError};

use crate::fixtures::TestDb;

const LEASE_TTL: Duration = Duration::from_secs(300);

#[test]
fn enqueue_duplicate_id_is_rejected() {
    let db = TestDb::new();
    let dal = db.dal();

    dal.jobs()
        .enqueue_job("j1", "echo hi", 3, Utc::now())
        .expect("first enqueue");
    let err = dal
        .jobs()
        .enqueue_job("j1", "echo again", 3, Utc::now())
        .expect_err("duplicate must fail");
    assert!(matches!(err, QueueError::DuplicateJobId(id) if id == "j1"));

    // The original row is untouched.
    let job = dal.jobs().get_by_id("j1").expect("get").expect("exists");
    assert_eq!(job.command, "echo hi");
}

#[test]
fn enqueue_validates_command_and_budget() {
    let db = TestDb::new();
    let dal = db.dal();

    let err = dal
        .jobs()
        .enqueue_job("j1", "   ", 3, Utc::now())
        .expect_err("empty command");
    assert!(matches!(err, QueueError::InvalidJobSpec(_)));

    let err = dal
        .jobs()
        .enqueue_job("j1", "echo hi", -1, Utc::now())
        .expect_err("negative budget");
    assert!(matches!(err, QueueError::InvalidJobSpec(_)));

    assert!(dal.jobs().get_by_id("j1").expect("get").is_none());
}

#[test]
fn lease_returns_none_when_nothing_is_due() {
    let db = TestDb::new();
    let dal = db.dal();

    assert!(dal
        .jobs()
        .lease_next_due("w1", Utc::now(), LEASE_TTL)
        .expect("lease")
        .is_none());
}

#[test]
fn lease_takes_oldest_job_with_id_tiebreak() {
    let db = TestDb::new();
    let dal = db.dal();

    // Same created_at for both, so the id decides.
    let now = Utc::now();
    dal.jobs().enqueue_job("beta", "true", 3, now).expect("enqueue");
    dal.jobs().enqueue_job("alpha", "true", 3, now).expect("enqueue");
    dal.jobs()
        .enqueue_job("older", "true", 3, now - chrono::Duration::seconds(10))
        .expect("enqueue");

    let first = dal
        .jobs()
        .lease_next_due("w1", Utc::now(), LEASE_TTL)
        .expect("lease")
        .expect("job due");
    assert_eq!(first.id, "older");

    let second = dal
        .jobs()
        .lease_next_due("w1", Utc::now(), LEASE_TTL)
        .expect("lease")
        .expect("job due");
    assert_eq!(second.id, "alpha");
}

#[test]
fn lease_sets_lock_fields_and_increments_attempts() {
    let db = TestDb::new();
    let dal = db.dal();

    dal.jobs().enqueue_job("j1", "true", 3, Utc::now()).expect("enqueue");
    let job = dal
        .jobs()
        .lease_next_due("w1", Utc::now(), LEASE_TTL)
        .expect("lease")
        .expect("job due");

    assert_eq!(job.state, JobState::Processing);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.locked_by.as_deref(), Some("w1"));
    assert!(job.locked_at.is_some());

    // The leased job is not due for anyone else.
    assert!(dal
        .jobs()
        .lease_next_due("w2", Utc::now(), LEASE_TTL)
        .expect("lease")
        .is_none());
}

#[test]
fn complete_requires_the_lease_holder() {
    let db = TestDb::new();
    let dal = db.dal();

    dal.jobs().enqueue_job("j1", "true", 3, Utc::now()).expect("enqueue");
    dal.jobs()
        .lease_next_due("w1", Utc::now(), LEASE_TTL)
        .expect("lease")
        .expect("job due");

    let err = dal
        .jobs()
        .complete_job("j1", "w2")
        .expect_err("not the holder");
    assert!(matches!(err, QueueError::NotLeased { .. }));

    dal.jobs().complete_job("j1", "w1").expect("holder completes");
    let job = dal.jobs().get_by_id("j1").expect("get").expect("exists");
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 1);
    assert!(job.error_message.is_none());
    assert!(job.locked_by.is_none());
    assert!(job.locked_at.is_none());

    // Completing twice fails: the lease is gone.
    let err = dal.jobs().complete_job("j1", "w1").expect_err("no lease");
    assert!(matches!(err, QueueError::NotLeased { .. }));
}

#[test]
fn failure_schedules_backoff_then_demotes_to_dlq() {
    let db = TestDb::new();
    let dal = db.dal();
    let policy = BackoffPolicy::new(2);

    let t0 = Utc::now();
    dal.jobs().enqueue_job("j2", "false", 2, t0).expect("enqueue");

    // Attempt 1 fails: retry in 2^1 = 2s.
    dal.jobs().lease_next_due("w1", t0, LEASE_TTL).expect("lease").expect("due");
    let outcome = dal
        .jobs()
        .fail_job("j2", "w1", "exit status 1", t0, &policy)
        .expect("fail");
    let FailOutcome::RetryScheduled { next_retry_at } = outcome else {
        panic!("expected a retry, got {outcome:?}");
    };
    assert_eq!(next_retry_at, t0 + chrono::Duration::seconds(2));

    // Not due until the retry time arrives.
    assert!(dal
        .jobs()
        .lease_next_due("w1", t0 + chrono::Duration::seconds(1), LEASE_TTL)
        .expect("lease")
        .is_none());

    // Attempt 2 fails: retry in 2^2 = 4s.
    let t1 = t0 + chrono::Duration::seconds(2);
    let job = dal
        .jobs()
        .lease_next_due("w1", t1, LEASE_TTL)
        .expect("lease")
        .expect("due again");
    assert_eq!(job.attempts, 2);
    let outcome = dal
        .jobs()
        .fail_job("j2", "w1", "exit status 1", t1, &policy)
        .expect("fail");
    let FailOutcome::RetryScheduled { next_retry_at } = outcome else {
        panic!("expected a retry, got {outcome:?}");
    };
    assert_eq!(next_retry_at, t1 + chrono::Duration::seconds(4));

    // Attempt 3 exceeds max_retries = 2: dead letter queue.
    let t2 = t1 + chrono::Duration::seconds(4);
    let job = dal
        .jobs()
        .lease_next_due("w1", t2, LEASE_TTL)
        .expect("lease")
        .expect("due again");
    assert_eq!(job.attempts, 3);
    let outcome = dal
        .jobs()
        .fail_job("j2", "w1", "exit status 1", t2, &policy)
        .expect("fail");
    assert_eq!(outcome, FailOutcome::MovedToDlq);

    let job = dal.jobs().get_by_id("j2").expect("get").expect("exists");
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.attempts, job.max_retries + 1);
    assert_eq!(job.error_message.as_deref(), Some("exit status 1"));
    assert!(job.next_retry_at.is_none());
    assert!(job.locked_by.is_none());
}

#[test]
fn zero_retry_budget_goes_straight_to_dlq() {
    let db = TestDb::new();
    let dal = db.dal();

    let now = Utc::now();
    dal.jobs().enqueue_job("j1", "false", 0, now).expect("enqueue");
    dal.jobs().lease_next_due("w1", now, LEASE_TTL).expect("lease").expect("due");

    let outcome = dal
        .jobs()
        .fail_job("j1", "w1", "boom", now, &BackoffPolicy::new(2))
        .expect("fail");
    assert_eq!(outcome, FailOutcome::MovedToDlq);

    let job = dal.jobs().get_by_id("j1").expect("get").expect("exists");
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.attempts, 1);
}

#[test]
fn fail_requires_the_lease_holder() {
    let db = TestDb::new();
    let dal = db.dal();

    let now = Utc::now();
    dal.jobs().enqueue_job("j1", "false", 3, now).expect("enqueue");
    dal.jobs().lease_next_due("w1", now, LEASE_TTL).expect("lease").expect("due");

    let err = dal
        .jobs()
        .fail_job("j1", "w2", "boom", now, &BackoffPolicy::new(2))
        .expect_err("not the holder");
    assert!(matches!(err, QueueError::NotLeased { .. }));

    let job = dal.jobs().get_by_id("j1").expect("get").expect("exists");
    assert_eq!(job.state, JobState::Processing);
    assert_eq!(job.locked_by.as_deref(), Some("w1"));
}

#[test]
fn expired_lease_is_retaken_and_counts_another_attempt() {
    let db = TestDb::new();
    let dal = db.dal();

    let now = Utc::now();
    dal.jobs().enqueue_job("j4", "sleep 30", 3, now).expect("enqueue");
    dal.jobs()
        .lease_next_due("worker-a", now, LEASE_TTL)
        .expect("lease")
        .expect("due");

    // Within the TTL the lease holds and nobody else may take the job.
    assert!(dal
        .jobs()
        .lease_next_due("worker-b", now + chrono::Duration::seconds(60), LEASE_TTL)
        .expect("lease")
        .is_none());

    // Once the lease ages out (worker-a presumed crashed), the job is due
    // again and the new lease charges a second attempt.
    let after_ttl = now + chrono::Duration::seconds(301);
    let job = dal
        .jobs()
        .lease_next_due("worker-b", after_ttl, LEASE_TTL)
        .expect("lease")
        .expect("orphan re-leased");
    assert_eq!(job.id, "j4");
    assert_eq!(job.attempts, 2);
    assert_eq!(job.locked_by.as_deref(), Some("worker-b"));

    // The late report from the presumed-dead worker is refused.
    let err = dal
        .jobs()
        .complete_job("j4", "worker-a")
        .expect_err("stale lease");
    assert!(matches!(err, QueueError::NotLeased { .. }));

    // The current holder's report lands.
    dal.jobs().complete_job("j4", "worker-b").expect("complete");
}

#[test]
fn lease_is_exclusive_under_contention() {
    let db = TestDb::new();
    let dal = db.dal();

    dal.jobs()
        .enqueue_job("contested", "echo hi", 3, Utc::now())
        .expect("enqueue");

    let workers = 5;
    let barrier = Arc::new(Barrier::new(workers));
    let mut handles = Vec::new();
    for i in 0..workers {
        let dal = dal.clone();
        let barrier = barrier.clone();
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            dal.jobs()
                .lease_next_due(&format!("worker-{i}"), Utc::now(), LEASE_TTL)
                .expect("lease")
        }));
    }

    let leased: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("thread"))
        .flatten()
        .collect();
    assert_eq!(leased.len(), 1, "exactly one worker must win the lease");
    assert_eq!(leased[0].id, "contested");
    assert_eq!(leased[0].attempts, 1);
}

#[test]
fn revive_resets_the_job_and_is_not_repeatable() {
    let db = TestDb::new();
    let dal = db.dal();

    let now = Utc::now();
    dal.jobs().enqueue_job("j2", "false", 0, now).expect("enqueue");
    dal.jobs().lease_next_due("w1", now, LEASE_TTL).expect("lease").expect("due");
    dal.jobs()
        .fail_job("j2", "w1", "boom", now, &BackoffPolicy::new(2))
        .expect("fail");

    let job = dal.jobs().revive_dead("j2").expect("revive");
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);
    assert!(job.error_message.is_none());
    assert!(job.next_retry_at.is_none());

    let err = dal.jobs().revive_dead("j2").expect_err("already revived");
    assert!(matches!(err, QueueError::NotDead(_)));

    let err = dal.jobs().revive_dead("ghost").expect_err("missing job");
    assert!(matches!(err, QueueError::JobNotFound(_)));
}

#[test]
fn status_counts_cover_every_state_and_sum_to_total() {
    let db = TestDb::new();
    let dal = db.dal();

    let now = Utc::now();
    dal.jobs().enqueue_job("p1", "true", 3, now).expect("enqueue");
    dal.jobs().enqueue_job("p2", "true", 3, now).expect("enqueue");
    dal.jobs().enqueue_job("c1", "true", 3, now).expect("enqueue");
    dal.jobs().enqueue_job("d1", "false", 0, now).expect("enqueue");

    dal.jobs().lease_next_due("w1", now, LEASE_TTL).expect("lease").expect("due");
    dal.jobs().complete_job("c1", "w1").expect("complete");
    dal.jobs().lease_next_due("w1", now, LEASE_TTL).expect("lease").expect("due");
    dal.jobs()
        .fail_job("d1", "w1", "boom", now, &BackoffPolicy::new(2))
        .expect("fail");

    let counts = dal.jobs().status_counts().expect("counts");
    assert_eq!(counts.len(), JobState::ALL.len());
    assert_eq!(counts[&JobState::Pending], 2);
    assert_eq!(counts[&JobState::Completed], 1);
    assert_eq!(counts[&JobState::Dead], 1);
    assert_eq!(counts[&JobState::Processing], 0);
    assert_eq!(counts[&JobState::Failed], 0);

    let total: i64 = counts.values().sum();
    assert_eq!(total as usize, dal.jobs().list_jobs(None, None).expect("list").len());
}

#[test]
fn list_jobs_filters_orders_and_limits() {
    let db = TestDb::new();
    let dal = db.dal();

    let now = Utc::now();
    for (i, id) in ["a", "b", "c"].iter().enumerate() {
        dal.jobs()
            .enqueue_job(id, "true", 3, now + chrono::Duration::seconds(i as i64))
            .expect("enqueue");
    }
    // Push "a" into the dead letter queue.
    dal.jobs().lease_next_due("w1", now, LEASE_TTL).expect("lease").expect("due");
    dal.jobs()
        .fail_job("a", "w1", "boom", now, &BackoffPolicy::new(2))
        .expect("fail");
    let db_a = dal.jobs().get_by_id("a").expect("get").expect("exists");
    assert_eq!(db_a.state, JobState::Failed);

    // Unfiltered listing is oldest-first and includes every state.
    let all = dal.jobs().list_jobs(None, None).expect("list");
    assert_eq!(
        all.iter().map(|j| j.id.as_str()).collect::<Vec<_>>(),
        vec!["a", "b", "c"]
    );

    let pending = dal
        .jobs()
        .list_jobs(Some(JobState::Pending), None)
        .expect("list");
    assert_eq!(
        pending.iter().map(|j| j.id.as_str()).collect::<Vec<_>>(),
        vec!["b", "c"]
    );

    let limited = dal.jobs().list_jobs(None, Some(2)).expect("list");
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].id, "a");
}

#[test]
fn worker_registry_tracks_heartbeats_and_shutdown() {
    let db = TestDb::new();
    let dal = db.dal();

    let now = Utc::now();
    dal.workers().register_worker("w1", now).expect("register");
    dal.workers().register_worker("w2", now).expect("register");

    let ttl = Duration::from_secs(30);
    assert_eq!(dal.workers().active_worker_count(now, ttl).expect("count"), 2);

    // A stale heartbeat drops a worker out of the active set.
    let later = now + chrono::Duration::seconds(60);
    assert_eq!(dal.workers().active_worker_count(later, ttl).expect("count"), 0);

    dal.workers().heartbeat("w1", later).expect("heartbeat");
    assert_eq!(dal.workers().active_worker_count(later, ttl).expect("count"), 1);

    // Heartbeat for an unknown worker reports the missing row.
    assert!(!dal.workers().heartbeat("ghost", later).expect("heartbeat"));

    dal.workers().mark_stopped("w1", later).expect("stop");
    assert_eq!(dal.workers().active_worker_count(later, ttl).expect("count"), 0);

    let active = dal.workers().list_active(later, ttl).expect("list");
    assert_eq!(active.len(), 1, "stopped workers still list until stale");
    assert_eq!(active[0].worker_id, "w1");
}
