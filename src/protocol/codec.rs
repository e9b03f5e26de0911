// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoder and encoder traits.

use bytes::{Bytes, BytesMut};

use crate::error::DecodeError;

use super::{SessionHeader, StatusCode, TransportHeader};

/// Something the decoder found in the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    /// A root-layer frame was received.
    ///
    /// Emitted for every frame, whatever it contains. The manager uses it for
    /// election and heartbeat timing only.
    RootData(TransportHeader),

    /// A command addressed to an endpoint.
    Request {
        /// Where the command came from.
        transport: TransportHeader,
        /// Session-layer header of the command.
        header: SessionHeader,
        /// The raw command payload.
        payload: Bytes,
    },
}

/// Layered E1.33 decoder shared by all device connections.
///
/// The manager owns one decoder and calls it synchronously from the inbound
/// data path, one connection at a time.
pub trait Decoder: Send {
    /// Decodes every complete frame in `buffer`.
    ///
    /// Consumed bytes must be removed from `buffer`; an incomplete trailing
    /// frame stays buffered until more data arrives. For each frame the decoder
    /// yields a [`DecoderEvent::RootData`] before any events from inner layers.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is corrupt. The connection is closed.
    fn decode(
        &mut self,
        transport: &TransportHeader,
        buffer: &mut BytesMut,
    ) -> Result<Vec<DecoderEvent>, DecodeError>;
}

/// Builds encoded envelopes for sending to devices.
pub trait MessageBuilder: Send + Sync {
    /// Builds a status message wrapped in session framing that echoes
    /// `sequence` and `endpoint`.
    fn build_status(
        &self,
        sequence: u32,
        endpoint: u16,
        code: StatusCode,
        description: &str,
    ) -> Bytes;

    /// Builds a TCP heartbeat message.
    fn build_heartbeat(&self) -> Bytes;
}
