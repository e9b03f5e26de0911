// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event system for device lifecycle changes.
//!
//! The device manager publishes a [`DeviceEvent`] whenever a device is added
//! or removed, connects or disconnects, or this controller gains or loses the
//! designated role for it. The [`EventBus`] uses tokio's broadcast channel so
//! any number of subscribers receive every event.
//!
//! # Examples
//!
//! ```
//! use std::net::Ipv4Addr;
//! use e133_manager::event::{DeviceEvent, EventBus};
//!
//! let bus = EventBus::new();
//!
//! // Subscribe to events
//! let mut rx = bus.subscribe();
//!
//! // Publish an event
//! bus.publish(DeviceEvent::device_added(Ipv4Addr::new(10, 0, 0, 5)));
//! ```

mod device_event;
mod event_bus;

pub use device_event::DeviceEvent;
pub use event_bus::EventBus;
