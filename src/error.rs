// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the device manager.
//!
//! Connectivity problems are recovered inside the manager and never surface
//! here; callers only see [`Error::ManagerClosed`] when the manager task is
//! gone. The remaining variants describe failed connect attempts and decoder
//! failures, which are logged where they occur.

use std::net::SocketAddrV4;
use std::time::Duration;

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The device manager task has stopped and no longer accepts requests.
    #[error("device manager has shut down")]
    ManagerClosed,

    /// A connect attempt did not complete within the connect timeout.
    #[error("connect to {endpoint} timed out after {} ms", timeout.as_millis())]
    ConnectTimeout {
        /// The endpoint being connected to.
        endpoint: SocketAddrV4,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// I/O error on a device socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The inbound byte stream could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Errors reported by a [`Decoder`](crate::protocol::Decoder) implementation.
///
/// Any decode error means the TCP stream can no longer be trusted; the manager
/// closes the connection when it sees one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A frame header or length field was invalid.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A frame used a vector this decoder does not understand.
    #[error("unknown vector {0:#x}")]
    UnknownVector(u32),

    /// A frame exceeded the maximum size the decoder accepts.
    #[error("frame of {actual} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Maximum accepted frame size.
        max: usize,
        /// The size announced by the frame.
        actual: usize,
    },
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
