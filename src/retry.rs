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

//! Exponential backoff policy for failed jobs.
//!
//! The delay after the `n`-th failed attempt is `base^n` seconds, so with
//! the default base of 2 a job waits 2s, 4s, 8s, ... between retries. The
//! policy is a pure function of the attempt count; the optional jitter adds
//! at most 10% on top and never shortens a delay.

use std::time::Duration;

use rand::Rng;

/// Stateless exponential backoff: `delay(n) = base^n` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: u32,
    jitter: bool,
}

impl BackoffPolicy {
    pub const DEFAULT_BASE: u32 = 2;

    pub fn new(base: u32) -> Self {
        Self {
            base,
            jitter: false,
        }
    }

    /// Adds up to 10% of positive random jitter to each delay.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// The delay to wait after the given 1-based failed attempt.
    pub fn delay(&self, attempt: i32) -> Duration {
        let exponent = attempt.max(1) as u32;
        let secs = u64::from(self.base.max(1)).saturating_pow(exponent);
        let delay = Duration::from_secs(secs);
        if !self.jitter {
            return delay;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.0..=0.1);
        delay.saturating_add(Duration::from_secs_f64((secs as f64 * factor).min(u32::MAX as f64)))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE)
    }
}
