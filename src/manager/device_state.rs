// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device state held by the device manager.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::net::TcpStream;

use crate::health::HealthMonitor;
use crate::transport::{InboundFeed, MessageQueue};

/// Where a managed device is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No TCP session; the connector is trying to connect or has been paused.
    Unconnected,
    /// A TCP session is open but the device has not sent anything yet.
    Connected,
    /// This controller is the designated controller for the device.
    Designated,
}

impl ConnectionPhase {
    /// Returns true if a TCP session is open.
    #[must_use]
    pub fn is_connected(self) -> bool {
        !matches!(self, Self::Unconnected)
    }
}

/// Identifies one TCP session.
///
/// Events from the reader task and the health monitor carry the id of the
/// session they belong to, so events from a session that has already been
/// torn down can be told apart from events for the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn first() -> Self {
        Self(0)
    }

    /// Returns this id and advances to the next one.
    pub(crate) fn take_next(&mut self) -> Self {
        let current = *self;
        self.0 += 1;
        current
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resources for one managed device.
///
/// Fields are declared in release order: the health monitor goes first
/// because it sends on the outbound queue, the queue and the inbound feed both
/// hold the socket, and the socket goes last.
pub(crate) struct DeviceState {
    pub(crate) health_monitor: Option<Box<dyn HealthMonitor>>,
    pub(crate) outbound_queue: Option<MessageQueue>,
    pub(crate) inbound_feed: Option<InboundFeed>,
    pub(crate) socket: Option<Arc<TcpStream>>,
    pub(crate) connection: Option<ConnectionId>,
    pub(crate) designated: bool,
    /// The election was lost and the connector endpoint is parked.
    pub(crate) paused: bool,
    address: Ipv4Addr,
}

impl DeviceState {
    pub(crate) fn new(address: Ipv4Addr) -> Self {
        Self {
            health_monitor: None,
            outbound_queue: None,
            inbound_feed: None,
            socket: None,
            connection: None,
            designated: false,
            paused: false,
            address,
        }
    }

    pub(crate) fn phase(&self) -> ConnectionPhase {
        if self.designated {
            ConnectionPhase::Designated
        } else if self.socket.is_some() {
            ConnectionPhase::Connected
        } else {
            ConnectionPhase::Unconnected
        }
    }

    /// Returns true if `connection` is the session currently open.
    pub(crate) fn is_current(&self, connection: ConnectionId) -> bool {
        self.connection == Some(connection)
    }

    /// Checks that a designated device has everything a designated session
    /// needs.
    pub(crate) fn is_consistent(&self) -> bool {
        !self.designated
            || (self.socket.is_some()
                && self.outbound_queue.is_some()
                && self.health_monitor.is_some())
    }

    /// Releases the session: monitor, queue, feed, then socket.
    ///
    /// Leaves `designated` and `paused` alone; the caller decides what the
    /// closed session means.
    pub(crate) fn release_connection(&mut self) {
        self.health_monitor = None;
        self.outbound_queue = None;
        self.inbound_feed = None;
        self.socket = None;
        self.connection = None;
    }
}

impl fmt::Debug for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceState")
            .field("address", &self.address)
            .field("phase", &self.phase())
            .field("paused", &self.paused)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}
