// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module providing utilities for retrying operations with exponential backoff.

use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DurationMilliSeconds;
use std::time::Duration;
use tokio::time::Instant;

pub use ::backoff::future::retry_notify;
pub use ::backoff::Error as BackoffError;
pub use ::backoff::ExponentialBackoff;

/// Bounds on how long, and how often, we retry a call to a remote store.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RetryPolicy {
    /// Budget for a single attempt.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "call_timeout_ms")]
    pub call_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "initial_interval_ms")]
    pub initial_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_interval_ms")]
    pub max_interval: Duration,
    /// Total time spent retrying before the store is declared unavailable.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_elapsed_ms")]
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            call_timeout: Duration::from_millis(500),
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(1),
            max_elapsed: Duration::from_secs(3),
        }
    }
}

/// The point by which a request must have answered
///
/// Retries and individual attempts made on behalf of the request are cut
/// short so none of them outlives it.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Deadline {
        Deadline { at: Instant::now() + budget, budget }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    /// The whole budget the request started with
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Zero once the deadline has passed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

impl RetryPolicy {
    /// Return a bounded backoff policy, further limited by `deadline` if the
    /// caller has one.
    pub fn backoff(&self, deadline: Option<&Deadline>) -> ExponentialBackoff {
        let max_elapsed = match deadline {
            Some(deadline) => self.max_elapsed.min(deadline.remaining()),
            None => self.max_elapsed,
        };
        policy_with_max(self.initial_interval, self.max_interval, max_elapsed)
    }

    /// Return the budget for the next attempt, or `None` if `deadline` has
    /// already passed.
    pub fn attempt_budget(&self, deadline: Option<&Deadline>) -> Option<Duration> {
        match deadline {
            Some(deadline) => {
                let remaining = deadline.remaining();
                if remaining.is_zero() {
                    None
                } else {
                    Some(self.call_timeout.min(remaining))
                }
            }
            None => Some(self.call_timeout),
        }
    }
}

fn policy_with_max(
    initial_interval: Duration,
    max_interval: Duration,
    max_elapsed: Duration,
) -> ExponentialBackoff {
    let current_interval = initial_interval;
    ExponentialBackoff {
        current_interval,
        initial_interval,
        multiplier: 2.0,
        max_interval,
        max_elapsed_time: Some(max_elapsed),
        ..ExponentialBackoff::default()
    }
}
