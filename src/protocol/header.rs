// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Header metadata attached to decoded messages.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// How a message reached this controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Received on a device's TCP session.
    Tcp,
    /// Received as a UDP datagram.
    Udp,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
        }
    }
}

/// Transport-origin metadata of a decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHeader {
    source: SocketAddrV4,
    transport: TransportType,
}

impl TransportHeader {
    /// Creates a header for a message received from `source`.
    #[must_use]
    pub fn new(source: SocketAddrV4, transport: TransportType) -> Self {
        Self { source, transport }
    }

    /// Creates a header for a message received over TCP.
    #[must_use]
    pub fn tcp(source: SocketAddrV4) -> Self {
        Self::new(source, TransportType::Tcp)
    }

    /// Returns the sender's socket address.
    #[must_use]
    pub fn source(&self) -> SocketAddrV4 {
        self.source
    }

    /// Returns the sender's IPv4 address, which identifies the device.
    #[must_use]
    pub fn source_ip(&self) -> Ipv4Addr {
        *self.source.ip()
    }

    /// Returns how the message arrived.
    #[must_use]
    pub fn transport(&self) -> TransportType {
        self.transport
    }
}

/// Session-layer metadata of a decoded command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHeader {
    /// Sequence number chosen by the sender; echoed in acknowledgments.
    pub sequence: u32,
    /// Endpoint the command is addressed to.
    pub endpoint: u16,
    /// Human readable name of the sender, if the framing carries one.
    pub source_name: String,
}

impl SessionHeader {
    /// Creates a header without a source name.
    #[must_use]
    pub fn new(sequence: u32, endpoint: u16) -> Self {
        Self {
            sequence,
            endpoint,
            source_name: String::new(),
        }
    }

    /// Sets the sender name.
    #[must_use]
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }
}

/// Status codes carried by E1.33 status messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    /// The request was received and processed.
    Ack = 0x0000,
    /// The RDM responder did not answer in time.
    RdmTimeout = 0x0001,
    /// The RDM responder returned an invalid response.
    RdmInvalidResponse = 0x0002,
    /// The receiver's buffers are full.
    BufferFull = 0x0003,
    /// The addressed UID is not known.
    UnknownUid = 0x0004,
    /// The addressed endpoint does not exist.
    NonexistentEndpoint = 0x0005,
    /// The UID is not behind the addressed endpoint.
    WrongEndpoint = 0x0006,
    /// An ack overflow was requested but the cache expired.
    AckOverflowCacheExpired = 0x0007,
    /// An ack overflow is still in progress.
    AckOverflowInProgress = 0x0008,
    /// A broadcast request was delivered.
    BroadcastComplete = 0x0009,
}

impl StatusCode {
    /// Returns the on-wire value.
    #[must_use]
    pub fn value(self) -> u16 {
        self as u16
    }
}
