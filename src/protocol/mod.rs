// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Protocol boundary between the device manager and the E1.33 codec.
//!
//! The layered root/session/command framing is not implemented in this crate.
//! The manager talks to it through two traits:
//!
//! - [`Decoder`]: turns the bytes buffered for one TCP connection into
//!   header-annotated [`DecoderEvent`]s
//! - [`MessageBuilder`]: produces the encoded envelopes the manager and the
//!   heartbeat monitor send to devices
//!
//! The header types here carry only the fields the manager needs for routing,
//! election and acknowledgments.

mod codec;
mod header;

pub use codec::{Decoder, DecoderEvent, MessageBuilder};
pub use header::{SessionHeader, StatusCode, TransportHeader, TransportType};

/// TCP port E1.33 devices listen on.
pub const E133_PORT: u16 = 5569;

/// Endpoint number of a device's root endpoint.
///
/// Commands addressed to this endpoint are delivered to the manager's command
/// handler.
pub const ROOT_ENDPOINT: u16 = 0;
