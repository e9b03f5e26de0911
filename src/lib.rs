// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `e133_manager` - Device connection manager for E1.33 (RDM over IP)
//! controllers.
//!
//! A controller keeps TCP sessions open to the devices it manages. Several
//! controllers may connect to the same device, but the device only talks to
//! one of them, its designated controller. This crate maintains those
//! sessions, infers whether this controller won each device, watches the
//! sessions it won with heartbeats, and reconnects dropped sessions with
//! exponential backoff.
//!
//! # Components
//!
//! - [`backoff`]: retry delay policies
//! - [`connector`]: keeps endpoints connected, retrying with a backoff policy
//! - [`health`]: heartbeat watchdog for designated sessions
//! - [`manager`]: the device manager and its handle
//! - [`event`]: broadcast of device lifecycle events
//! - [`protocol`]: headers and the decoder/encoder traits the manager is
//!   built against
//!
//! The layered E1.33 decoder and the message encoder are not part of this
//! crate; plug them in through [`protocol::Decoder`] and
//! [`protocol::MessageBuilder`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use std::sync::Arc;
//! use e133_manager::manager::{DeviceManager, ManagerConfig};
//! # use e133_manager::protocol::{Decoder, MessageBuilder};
//! # fn my_decoder() -> Box<dyn Decoder> { unimplemented!() }
//! # fn my_builder() -> Arc<dyn MessageBuilder> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> e133_manager::Result<()> {
//!     let mut manager = DeviceManager::with_tcp(
//!         ManagerConfig::default(),
//!         my_decoder(),
//!         my_builder(),
//!     );
//!     manager.set_acquire_device_callback(|address| println!("controlling {address}"));
//!     manager.set_release_device_callback(|address| println!("lost {address}"));
//!
//!     let handle = manager.spawn();
//!     handle.add_device(Ipv4Addr::new(192, 168, 1, 40)).await?;
//!     handle.add_device(Ipv4Addr::new(192, 168, 1, 41)).await?;
//!
//!     println!("designated for {:?}", handle.list_managed_devices().await?);
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod connector;
pub mod error;
pub mod event;
pub mod health;
pub mod manager;
pub mod protocol;
pub mod transport;

pub use backoff::{BackoffPolicy, ExponentialBackoffPolicy, LinearBackoffPolicy};
pub use connector::{Connector, EndpointState, TcpConnector};
pub use error::{DecodeError, Error, Result};
pub use event::{DeviceEvent, EventBus};
pub use manager::{ConnectionPhase, DeviceManager, DeviceManagerHandle, ManagerConfig};
