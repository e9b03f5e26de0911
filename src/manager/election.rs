// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Designated controller election.
//!
//! E1.33 devices accept several controller connections but only talk to the
//! one they picked as designated controller. There is no explicit handshake:
//! the first root-layer message a device sends over our TCP session means it
//! chose us, and a session the device closes before sending anything means it
//! chose someone else.

use crate::protocol::{TransportHeader, TransportType};

/// What an inbound root-layer message means for the session it arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InboundSignal {
    /// Not relevant to the session; UDP traffic is not tied to a controller.
    Ignore,
    /// Proof of life on a session we already own.
    Heartbeat,
    /// The device just designated us.
    Elected,
}

/// Classifies a root-layer message received from a device whose session is
/// currently `designated` (or not).
pub(crate) fn classify(transport: &TransportHeader, designated: bool) -> InboundSignal {
    if transport.transport() != TransportType::Tcp {
        return InboundSignal::Ignore;
    }

    if designated {
        InboundSignal::Heartbeat
    } else {
        InboundSignal::Elected
    }
}
