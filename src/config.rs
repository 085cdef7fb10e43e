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

//! Typed configuration over the persisted key/value store.
//!
//! Two keys are recognized: `max_retries` (default 3) and `backoff_base`
//! (default 2, minimum 2). Values are stored as strings and parsed on every
//! read; nothing is cached, so a change takes effect the next time anything
//! consults the configuration. A stored value that no longer parses falls
//! back to the default with a warning rather than wedging the queue.

use serde::Serialize;
use tracing::warn;

use crate::dal::DAL;
use crate::database::Database;
use crate::error::QueueError;

pub const KEY_MAX_RETRIES: &str = "max_retries";
pub const KEY_BACKOFF_BASE: &str = "backoff_base";

pub const DEFAULT_MAX_RETRIES: i32 = 3;
pub const DEFAULT_BACKOFF_BASE: u32 = 2;
pub const MIN_BACKOFF_BASE: u32 = 2;

/// Point-in-time view of every recognized setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigSnapshot {
    pub max_retries: i32,
    pub backoff_base: u32,
}

/// Reads and validates the tunable queue parameters.
#[derive(Clone)]
pub struct ConfigService {
    dal: DAL,
}

impl ConfigService {
    pub fn new(database: &Database) -> Self {
        Self {
            dal: DAL::new(database.pool()),
        }
    }

    pub(crate) fn with_dal(dal: DAL) -> Self {
        Self { dal }
    }

    /// The default retry budget applied to jobs that do not override it.
    pub fn max_retries(&self) -> Result<i32, QueueError> {
        match self.dal.config().get(KEY_MAX_RETRIES)? {
            Some(raw) => match raw.parse::<i32>() {
                Ok(n) if n >= 0 => Ok(n),
                _ => {
                    warn!(
                        key = KEY_MAX_RETRIES,
                        value = %raw,
                        "stored value is invalid, using default"
                    );
                    Ok(DEFAULT_MAX_RETRIES)
                }
            },
            None => Ok(DEFAULT_MAX_RETRIES),
        }
    }

    /// The exponential backoff base used when scheduling retries.
    pub fn backoff_base(&self) -> Result<u32, QueueError> {
        match self.dal.config().get(KEY_BACKOFF_BASE)? {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n >= MIN_BACKOFF_BASE => Ok(n),
                _ => {
                    warn!(
                        key = KEY_BACKOFF_BASE,
                        value = %raw,
                        "stored value is invalid, using default"
                    );
                    Ok(DEFAULT_BACKOFF_BASE)
                }
            },
            None => Ok(DEFAULT_BACKOFF_BASE),
        }
    }

    /// Validates and persists a setting. Unknown keys and unparseable or
    /// out-of-range values are rejected without touching the store.
    pub fn set(&self, key: &str, value: &str) -> Result<(), QueueError> {
        match key {
            KEY_MAX_RETRIES => {
                let n: i32 = value.parse().map_err(|_| {
                    QueueError::InvalidConfig(format!(
                        "{KEY_MAX_RETRIES} must be an integer, got '{value}'"
                    ))
                })?;
                if n < 0 {
                    return Err(QueueError::InvalidConfig(format!(
                        "{KEY_MAX_RETRIES} must be >= 0, got {n}"
                    )));
                }
            }
            KEY_BACKOFF_BASE => {
                let n: u32 = value.parse().map_err(|_| {
                    QueueError::InvalidConfig(format!(
                        "{KEY_BACKOFF_BASE} must be an integer, got '{value}'"
                    ))
                })?;
                if n < MIN_BACKOFF_BASE {
                    return Err(QueueError::InvalidConfig(format!(
                        "{KEY_BACKOFF_BASE} must be >= {MIN_BACKOFF_BASE}, got {n}"
                    )));
                }
            }
            other => {
                return Err(QueueError::InvalidConfig(format!(
                    "unknown configuration key '{other}'"
                )));
            }
        }
        self.dal.config().set(key, value)
    }

    pub fn snapshot(&self) -> Result<ConfigSnapshot, QueueError> {
        Ok(ConfigSnapshot {
            max_retries: self.max_retries()?,
            backoff_base: self.backoff_base()?,
        })
    }
}
