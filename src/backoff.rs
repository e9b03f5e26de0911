// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Retry delay policies for the connector.
//!
//! A policy maps the number of consecutive failed connect attempts for an
//! endpoint to the delay before the next attempt. The connector resets the
//! failure count to zero whenever a connection succeeds, so the first retry
//! after a drop always waits the initial delay.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use e133_manager::backoff::{BackoffPolicy, ExponentialBackoffPolicy};
//!
//! let policy = ExponentialBackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(30));
//!
//! assert_eq!(policy.backoff_time(1), Duration::from_secs(5));
//! assert_eq!(policy.backoff_time(2), Duration::from_secs(10));
//! assert_eq!(policy.backoff_time(3), Duration::from_secs(20));
//! assert_eq!(policy.backoff_time(4), Duration::from_secs(30));
//! ```

use std::fmt;
use std::time::Duration;

/// Computes the delay before the next connection attempt.
///
/// Implementations must be pure: the same `failed_attempts` always yields the
/// same delay.
pub trait BackoffPolicy: Send + Sync + fmt::Debug {
    /// Returns the delay to wait after `failed_attempts` consecutive failures.
    ///
    /// `failed_attempts` is zero when an established connection was dropped.
    fn backoff_time(&self, failed_attempts: u32) -> Duration;
}

/// Exponential backoff bounded by an initial and a maximum delay.
///
/// The delay after `n` failures is `initial * multiplier^(n - 1)`, never less
/// than `initial` and never more than `max`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoffPolicy {
    initial: Duration,
    max: Duration,
    multiplier: f32,
}

impl ExponentialBackoffPolicy {
    /// Default growth factor between consecutive attempts.
    pub const DEFAULT_MULTIPLIER: f32 = 2.0;

    /// Creates a doubling policy.
    ///
    /// If `max` is smaller than `initial` the delay is pinned at `initial`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: Self::DEFAULT_MULTIPLIER,
        }
    }

    /// Sets the growth factor. Values below 1.0 are raised to 1.0 so delays
    /// never shrink.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f32) -> Self {
        self.multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            Self::DEFAULT_MULTIPLIER
        };
        self
    }

    /// Returns the initial delay.
    #[must_use]
    pub fn initial(&self) -> Duration {
        self.initial
    }

    /// Returns the maximum delay.
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }
}

impl BackoffPolicy for ExponentialBackoffPolicy {
    fn backoff_time(&self, failed_attempts: u32) -> Duration {
        if failed_attempts <= 1 {
            return self.initial;
        }

        let exponent = i32::try_from(failed_attempts - 1).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * f64::from(self.multiplier).powi(exponent);

        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Linear backoff: `step * failed_attempts`, capped at `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearBackoffPolicy {
    step: Duration,
    max: Duration,
}

impl LinearBackoffPolicy {
    /// Creates a linear policy.
    #[must_use]
    pub fn new(step: Duration, max: Duration) -> Self {
        Self {
            step,
            max: max.max(step),
        }
    }
}

impl BackoffPolicy for LinearBackoffPolicy {
    fn backoff_time(&self, failed_attempts: u32) -> Duration {
        self.step
            .saturating_mul(failed_attempts.max(1))
            .min(self.max)
    }
}
