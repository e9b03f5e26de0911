// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration for the device manager.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{BackoffPolicy, ExponentialBackoffPolicy};
use crate::health::HeartbeatConfig;
use crate::protocol::E133_PORT;

/// Tuning for the device manager.
///
/// Every field has a default, so a partial configuration file deserializes
/// into a complete one.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use e133_manager::manager::ManagerConfig;
///
/// // Defaults: port 5569, 5 s connect timeout, retries from 5 s up to 30 s
/// let config = ManagerConfig::default();
/// assert_eq!(config.port, 5569);
///
/// // Custom retry timing
/// let config = ManagerConfig::new()
///     .with_initial_retry_delay(Duration::from_secs(1))
///     .with_max_retry_delay(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// TCP port devices listen on.
    pub port: u16,
    /// How long a single connect attempt may take.
    pub connect_timeout: Duration,
    /// Delay before the first retry of a failed endpoint.
    pub initial_retry_delay: Duration,
    /// Upper bound for the retry delay.
    pub max_retry_delay: Duration,
    /// Growth factor of the retry delay per consecutive failure.
    pub backoff_multiplier: f32,
    /// Requests a [`DeviceManagerHandle`](super::DeviceManagerHandle) may
    /// queue before callers wait.
    pub request_capacity: usize,
    /// Events buffered per subscriber before it starts lagging.
    pub event_capacity: usize,
    /// Heartbeat timing for designated sessions.
    pub heartbeat: HeartbeatConfig,
}

impl ManagerConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the device port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the initial retry delay.
    #[must_use]
    pub fn with_initial_retry_delay(mut self, delay: Duration) -> Self {
        self.initial_retry_delay = delay;
        self
    }

    /// Sets the maximum retry delay.
    #[must_use]
    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the request queue capacity.
    #[must_use]
    pub fn with_request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity;
        self
    }

    /// Sets the event channel capacity.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Sets the heartbeat timing.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Builds the backoff policy shared by all device endpoints.
    #[must_use]
    pub fn backoff_policy(&self) -> Arc<dyn BackoffPolicy> {
        Arc::new(
            ExponentialBackoffPolicy::new(self.initial_retry_delay, self.max_retry_delay)
                .with_multiplier(self.backoff_multiplier),
        )
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            port: E133_PORT,
            connect_timeout: Duration::from_secs(5),
            initial_retry_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            request_capacity: 64,
            event_capacity: 256,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}
