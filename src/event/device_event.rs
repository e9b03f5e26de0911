// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device event types.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Events emitted by the device manager.
///
/// Every event carries the address of the device it concerns.
///
/// # Examples
///
/// ```
/// use std::net::Ipv4Addr;
/// use e133_manager::event::DeviceEvent;
///
/// let address = Ipv4Addr::new(10, 0, 0, 5);
///
/// let added = DeviceEvent::device_added(address);
/// assert!(added.is_lifecycle());
///
/// let acquired = DeviceEvent::acquired(address);
/// assert!(acquired.is_designation());
/// assert_eq!(acquired.address(), address);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// A device was added to the manager.
    DeviceAdded {
        /// Address of the added device.
        address: Ipv4Addr,
    },

    /// A device was removed from the manager.
    DeviceRemoved {
        /// Address of the removed device.
        address: Ipv4Addr,
    },

    /// A TCP session to the device was opened or closed.
    ConnectionChanged {
        /// Address of the device.
        address: Ipv4Addr,
        /// Whether a session is now open.
        connected: bool,
    },

    /// This controller became, or stopped being, the designated controller
    /// for the device.
    DesignationChanged {
        /// Address of the device.
        address: Ipv4Addr,
        /// Whether this controller is now designated.
        designated: bool,
    },
}

impl DeviceEvent {
    /// Returns the device address associated with this event.
    #[must_use]
    pub fn address(&self) -> Ipv4Addr {
        match self {
            Self::DeviceAdded { address }
            | Self::DeviceRemoved { address }
            | Self::ConnectionChanged { address, .. }
            | Self::DesignationChanged { address, .. } => *address,
        }
    }

    /// Returns `true` if this is a device lifecycle event (added/removed).
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::DeviceAdded { .. } | Self::DeviceRemoved { .. })
    }

    /// Returns `true` if this is a connection event.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::ConnectionChanged { .. })
    }

    /// Returns `true` if this is a designation event.
    #[must_use]
    pub fn is_designation(&self) -> bool {
        matches!(self, Self::DesignationChanged { .. })
    }

    /// Creates a device added event.
    #[must_use]
    pub fn device_added(address: Ipv4Addr) -> Self {
        Self::DeviceAdded { address }
    }

    /// Creates a device removed event.
    #[must_use]
    pub fn device_removed(address: Ipv4Addr) -> Self {
        Self::DeviceRemoved { address }
    }

    /// Creates a connected event.
    #[must_use]
    pub fn connected(address: Ipv4Addr) -> Self {
        Self::ConnectionChanged {
            address,
            connected: true,
        }
    }

    /// Creates a disconnected event.
    #[must_use]
    pub fn disconnected(address: Ipv4Addr) -> Self {
        Self::ConnectionChanged {
            address,
            connected: false,
        }
    }

    /// Creates an event for winning the designation.
    #[must_use]
    pub fn acquired(address: Ipv4Addr) -> Self {
        Self::DesignationChanged {
            address,
            designated: true,
        }
    }

    /// Creates an event for losing the designation.
    #[must_use]
    pub fn released(address: Ipv4Addr) -> Self {
        Self::DesignationChanged {
            address,
            designated: false,
        }
    }
}
