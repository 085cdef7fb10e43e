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

//! Diesel table definitions for the queue store.
//!
//! Timestamps are stored as RFC 3339 TEXT (see [`crate::database::types`]);
//! job and worker states are stored as lowercase TEXT.

diesel::table! {
    jobs (id) {
        id -> Text,
        command -> Text,
        state -> Text,
        attempts -> Integer,
        max_retries -> Integer,
        created_at -> Text,
        updated_at -> Text,
        error_message -> Nullable<Text>,
        next_retry_at -> Nullable<Text>,
        locked_by -> Nullable<Text>,
        locked_at -> Nullable<Text>,
    }
}

diesel::table! {
    workers (worker_id) {
        worker_id -> Text,
        started_at -> Text,
        last_heartbeat -> Text,
        status -> Text,
    }
}

diesel::table! {
    config (key) {
        key -> Text,
        value -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(jobs, workers, config);
