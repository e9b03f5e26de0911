// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Heartbeat-based health monitor.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::protocol::MessageBuilder;
use crate::transport::QueueHandle;

use super::{HealthMonitor, HealthMonitorFactory, UnhealthyCallback};

/// Timing of the heartbeat exchange.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use e133_manager::health::HeartbeatConfig;
///
/// let config = HeartbeatConfig::default().with_interval(Duration::from_secs(2));
/// assert_eq!(config.timeout(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between heartbeats sent to the device. Must be non-zero; a
    /// monitor with a zero interval fails setup.
    pub interval: Duration,
    /// The session is unhealthy after `interval * timeout_multiplier` without
    /// receiving anything.
    pub timeout_multiplier: f32,
}

impl HeartbeatConfig {
    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the timeout multiplier.
    #[must_use]
    pub fn with_timeout_multiplier(mut self, multiplier: f32) -> Self {
        self.timeout_multiplier = multiplier;
        self
    }

    /// Returns how long the session may stay silent. Never shorter than one
    /// interval.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        let multiplier = f64::from(self.timeout_multiplier.max(1.0));
        Duration::try_from_secs_f64(self.interval.as_secs_f64() * multiplier)
            .unwrap_or(self.interval)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout_multiplier: 2.5,
        }
    }
}

/// Sends heartbeats on a session and watches for the device's.
///
/// After [`setup`](HealthMonitor::setup) a background task sends a heartbeat
/// every interval. If nothing is received from the device for the configured
/// timeout, the unhealthy callback runs and the task ends.
pub struct HeartbeatMonitor {
    device: Ipv4Addr,
    config: HeartbeatConfig,
    queue: QueueHandle,
    builder: Arc<dyn MessageBuilder>,
    on_unhealthy: Option<UnhealthyCallback>,
    last_heartbeat: Arc<Mutex<Instant>>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    /// Creates a monitor. Nothing is sent until `setup` is called.
    #[must_use]
    pub fn new(
        device: Ipv4Addr,
        config: HeartbeatConfig,
        queue: QueueHandle,
        builder: Arc<dyn MessageBuilder>,
        on_unhealthy: UnhealthyCallback,
    ) -> Self {
        Self {
            device,
            config,
            queue,
            builder,
            on_unhealthy: Some(on_unhealthy),
            last_heartbeat: Arc::new(Mutex::new(Instant::now())),
            task: None,
        }
    }
}

impl HealthMonitor for HeartbeatMonitor {
    fn setup(&mut self) -> bool {
        if self.task.is_some() {
            return true;
        }
        if self.config.interval.is_zero() {
            tracing::warn!(device = %self.device, "Heartbeat interval is zero, cannot monitor session");
            return false;
        }
        let Some(on_unhealthy) = self.on_unhealthy.take() else {
            return false;
        };

        if !self.queue.send_message(self.builder.build_heartbeat()) {
            tracing::warn!(device = %self.device, "Unable to send initial heartbeat");
            return false;
        }
        *self.last_heartbeat.lock() = Instant::now();

        self.task = Some(tokio::spawn(watch(
            self.device,
            self.config.interval,
            self.config.timeout(),
            self.queue.clone(),
            Arc::clone(&self.builder),
            Arc::clone(&self.last_heartbeat),
            on_unhealthy,
        )));
        true
    }

    fn heartbeat_received(&mut self) {
        *self.last_heartbeat.lock() = Instant::now();
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for HeartbeatMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatMonitor")
            .field("device", &self.device)
            .field("config", &self.config)
            .field("running", &self.task.is_some())
            .finish_non_exhaustive()
    }
}

async fn watch(
    device: Ipv4Addr,
    interval: Duration,
    timeout: Duration,
    queue: QueueHandle,
    builder: Arc<dyn MessageBuilder>,
    last_heartbeat: Arc<Mutex<Instant>>,
    on_unhealthy: UnhealthyCallback,
) {
    let mut send_timer = tokio::time::interval_at(Instant::now() + interval, interval);
    send_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let deadline = *last_heartbeat.lock() + timeout;

        tokio::select! {
            _ = send_timer.tick() => {
                if !queue.send_message(builder.build_heartbeat()) {
                    tracing::debug!(%device, "Outbound queue closed, heartbeat not sent");
                }
            }
            () = tokio::time::sleep_until(deadline) => {
                // A heartbeat may have moved the deadline while we slept.
                if *last_heartbeat.lock() + timeout <= Instant::now() {
                    tracing::info!(
                        %device,
                        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "No heartbeat received within timeout"
                    );
                    on_unhealthy();
                    return;
                }
            }
        }
    }
}

/// Creates [`HeartbeatMonitor`]s sharing one configuration and builder.
pub struct HeartbeatMonitorFactory {
    config: HeartbeatConfig,
    builder: Arc<dyn MessageBuilder>,
}

impl HeartbeatMonitorFactory {
    /// Creates a factory.
    #[must_use]
    pub fn new(config: HeartbeatConfig, builder: Arc<dyn MessageBuilder>) -> Self {
        Self { config, builder }
    }
}

impl HealthMonitorFactory for HeartbeatMonitorFactory {
    fn create(
        &mut self,
        device: Ipv4Addr,
        queue: QueueHandle,
        on_unhealthy: UnhealthyCallback,
    ) -> Box<dyn HealthMonitor> {
        Box::new(HeartbeatMonitor::new(
            device,
            self.config.clone(),
            queue,
            Arc::clone(&self.builder),
            on_unhealthy,
        ))
    }
}
