// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device manager for E1.33 controllers.
//!
//! The [`DeviceManager`] keeps a TCP session open to every device it manages,
//! works out for which devices this controller is the designated controller,
//! watches designated sessions with a health monitor, and reconnects dropped
//! sessions with exponential backoff.
//!
//! # Overview
//!
//! - **Registration**: [`add_device`](DeviceManager::add_device) and
//!   [`remove_device`](DeviceManager::remove_device)
//! - **Election**: the first message a device sends over our session makes us
//!   its designated controller; the acquire and release callbacks report
//!   changes
//! - **Commands**: commands to the root endpoint go to the command handler and
//!   are acknowledged when it accepts them
//! - **Events**: lifecycle changes are broadcast as
//!   [`DeviceEvent`](crate::event::DeviceEvent)s
//!
//! # Examples
//!
//! ## Running the manager
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use std::sync::Arc;
//! use e133_manager::manager::{DeviceManager, ManagerConfig};
//! # use e133_manager::protocol::{Decoder, MessageBuilder};
//! # fn decoder() -> Box<dyn Decoder> { unimplemented!() }
//! # fn builder() -> Arc<dyn MessageBuilder> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> e133_manager::Result<()> {
//!     let mut manager = DeviceManager::with_tcp(ManagerConfig::default(), decoder(), builder());
//!
//!     manager.set_command_handler(|transport, header, payload| {
//!         println!("{} sent {} bytes (seq {})", transport.source(), payload.len(), header.sequence);
//!         true
//!     });
//!
//!     let handle = manager.spawn();
//!     handle.add_device(Ipv4Addr::new(192, 168, 1, 40)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Event Subscription
//!
//! ```no_run
//! use e133_manager::event::DeviceEvent;
//! use e133_manager::manager::DeviceManagerHandle;
//!
//! # fn example(handle: DeviceManagerHandle) {
//! let mut events = handle.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             DeviceEvent::DesignationChanged { address, designated } => {
//!                 println!("{address} designated: {designated}");
//!             }
//!             DeviceEvent::ConnectionChanged { address, connected } => {
//!                 println!("{address} connected: {connected}");
//!             }
//!             _ => {}
//!         }
//!     }
//! });
//! # }
//! ```

mod config;
mod device_manager;
mod device_state;
mod election;
mod handle;
#[cfg(test)]
pub(crate) mod testing;

pub use config::ManagerConfig;
pub use device_manager::{Collaborators, CommandHandler, DeviceCallback, DeviceManager};
pub use device_state::ConnectionPhase;
pub use handle::DeviceManagerHandle;
