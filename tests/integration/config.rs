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

//! Configuration service tests: defaults, validation, and fallbacks.

use queuectl::{ConfigService, QueueError};

use crate::fixtures::TestDb;

#[test]
fn defaults_apply_when_nothing_is_stored() {
    let db = TestDb::new();
    let config = ConfigService::new(&db.database);

    assert_eq!(config.max_retries().expect("read"), 3);
    assert_eq!(config.backoff_base().expect("read"), 2);

    let snapshot = config.snapshot().expect("snapshot");
    assert_eq!(snapshot.max_retries, 3);
    assert_eq!(snapshot.backoff_base, 2);
}

#[test]
fn set_and_read_back() {
    let db = TestDb::new();
    let config = ConfigService::new(&db.database);

    config.set("max_retries", "5").expect("set");
    config.set("backoff_base", "4").expect("set");

    assert_eq!(config.max_retries().expect("read"), 5);
    assert_eq!(config.backoff_base().expect("read"), 4);
}

#[test]
fn unknown_keys_are_rejected() {
    let db = TestDb::new();
    let config = ConfigService::new(&db.database);

    let err = config.set("poll_interval", "10").expect_err("unknown key");
    assert!(matches!(err, QueueError::InvalidConfig(_)));
}

#[test]
fn out_of_range_values_are_rejected() {
    let db = TestDb::new();
    let config = ConfigService::new(&db.database);

    let err = config.set("max_retries", "-1").expect_err("negative");
    assert!(matches!(err, QueueError::InvalidConfig(_)));

    let err = config.set("max_retries", "three").expect_err("not a number");
    assert!(matches!(err, QueueError::InvalidConfig(_)));

    // A base of 1 would make every delay one second; the floor is 2.
    let err = config.set("backoff_base", "1").expect_err("below minimum");
    assert!(matches!(err, QueueError::InvalidConfig(_)));

    // Nothing was persisted by the rejected writes.
    assert_eq!(config.max_retries().expect("read"), 3);
    assert_eq!(config.backoff_base().expect("read"), 2);
}

#[test]
fn unparseable_stored_values_fall_back_to_defaults() {
    let db = TestDb::new();
    let dal = db.dal();
    let config = ConfigService::new(&db.database);

    // Corrupt the stored values behind the service's back.
    dal.config().set("max_retries", "lots").expect("raw set");
    dal.config().set("backoff_base", "0").expect("raw set");

    assert_eq!(config.max_retries().expect("read"), 3);
    assert_eq!(config.backoff_base().expect("read"), 2);
}
