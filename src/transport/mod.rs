// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte transport for device TCP sessions.
//!
//! A connected socket is shared between two tasks:
//!
//! - the inbound feed's reader task, which waits for read readiness and
//!   forwards received bytes to the manager
//! - the outbound message queue's writer task, which drains queued
//!   envelopes onto the socket
//!
//! Both tasks are stopped when their owner is dropped.

mod incoming;
mod message_queue;

pub(crate) use incoming::{InboundFeed, SocketEvent};
pub(crate) use message_queue::MessageQueue;
pub use message_queue::QueueHandle;
