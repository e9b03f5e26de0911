// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound TCP connection management with retries.
//!
//! A [`Connector`] keeps a set of endpoints connected. Each endpoint is
//! attempted with a fixed connect timeout; failures are retried after a delay
//! chosen by the endpoint's [`BackoffPolicy`]. Every successful connection is
//! handed to the connect callback exactly once.
//!
//! # Endpoint lifecycle
//!
//! ```text
//!   add_endpoint ──► Connecting ──ok──► Connected ──disconnect(pause)──► Paused
//!                      ▲    │                │                             │
//!                      │   err          disconnect                   add_endpoint
//!                      │    ▼                ▼                             │
//!                      └─ WaitingRetry ◄─────┘             Connecting ◄────┘
//! ```
//!
//! [`TcpConnector`] is the tokio implementation used by the device manager.

mod endpoint;
mod tcp;

use std::net::SocketAddrV4;
use std::sync::Arc;

use tokio::net::TcpStream;

use crate::backoff::BackoffPolicy;

pub use endpoint::EndpointState;
pub use tcp::TcpConnector;

/// Callback receiving each newly connected socket along with the endpoint it
/// was dialled on.
pub type ConnectCallback = Box<dyn Fn(SocketAddrV4, TcpStream) + Send + Sync>;

/// Keeps a set of TCP endpoints connected.
///
/// No method blocks; connection attempts run in the background.
pub trait Connector: Send {
    /// Installs the callback that receives connected sockets.
    fn set_on_connect(&mut self, on_connect: ConnectCallback);

    /// Starts managing `endpoint`.
    ///
    /// Adding an endpoint that is already managed does nothing, unless it is
    /// paused, in which case connection attempts resume immediately.
    fn add_endpoint(&mut self, endpoint: SocketAddrV4, policy: Arc<dyn BackoffPolicy>);

    /// Reports that the connection to `endpoint` was closed.
    ///
    /// With `pause` false the endpoint is retried after its backoff delay. With
    /// `pause` true it is parked and not retried until added again.
    fn disconnect(&mut self, endpoint: SocketAddrV4, pause: bool);

    /// Stops managing `endpoint`, cancelling any attempt or pending retry.
    fn remove_endpoint(&mut self, endpoint: SocketAddrV4);
}
