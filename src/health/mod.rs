// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Liveness monitoring for designated device sessions.
//!
//! Once this controller becomes the designated controller for a device, the
//! manager attaches a [`HealthMonitor`] to the session. Every message received
//! from the device counts as a heartbeat. When none arrives within the
//! monitor's timeout window the monitor runs its [`UnhealthyCallback`] and the
//! manager closes the session.
//!
//! [`HeartbeatMonitor`] is the stock implementation. Tests and alternative
//! deployments can plug in their own through [`HealthMonitorFactory`].

mod heartbeat;

use std::net::Ipv4Addr;

pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor, HeartbeatMonitorFactory};

use crate::transport::QueueHandle;

/// Callback run once when a session is deemed unhealthy.
pub type UnhealthyCallback = Box<dyn FnOnce() + Send>;

/// Heartbeat watchdog attached to one designated session.
///
/// Dropping the monitor stops all of its timers.
pub trait HealthMonitor: Send {
    /// Starts monitoring. Returns `false` if the monitor could not be started;
    /// the manager then treats the session as closed.
    fn setup(&mut self) -> bool;

    /// Records that data was received from the device.
    fn heartbeat_received(&mut self);
}

/// Creates health monitors for newly designated sessions.
pub trait HealthMonitorFactory: Send {
    /// Creates a monitor for `device`.
    ///
    /// `queue` is the session's outbound queue. `on_unhealthy` must be run at
    /// most once, when the heartbeat timeout expires.
    fn create(
        &mut self,
        device: Ipv4Addr,
        queue: QueueHandle,
        on_unhealthy: UnhealthyCallback,
    ) -> Box<dyn HealthMonitor>;
}
