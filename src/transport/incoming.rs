// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound side of a device connection.

use std::io;
use std::net::SocketAddrV4;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::protocol::TransportHeader;

/// Bytes reserved for each read.
const READ_CHUNK: usize = 4096;

/// Something that happened on a socket being read.
#[derive(Debug)]
pub(crate) enum SocketEvent {
    /// Bytes were received.
    Data(Bytes),
    /// The peer closed the connection (`None`) or the socket failed.
    Closed(Option<io::Error>),
}

/// Feeds the bytes received from one device into the shared decoder.
///
/// Owns the read-readiness task for the socket and the buffer holding any
/// partial frame between reads. Dropping the feed stops reading.
pub(crate) struct InboundFeed {
    peer: SocketAddrV4,
    buffer: BytesMut,
    reader: JoinHandle<()>,
}

impl InboundFeed {
    /// Starts reading from `socket`, reporting every read to `on_event`.
    ///
    /// `on_event` is called from the reader task. After a
    /// [`SocketEvent::Closed`] it is never called again.
    pub(crate) fn start<F>(peer: SocketAddrV4, socket: Arc<TcpStream>, on_event: F) -> Self
    where
        F: Fn(SocketEvent) + Send + 'static,
    {
        let reader = tokio::spawn(read_loop(socket, on_event));

        Self {
            peer,
            buffer: BytesMut::new(),
            reader,
        }
    }

    /// Header to attach to everything decoded from this connection.
    pub(crate) fn transport_header(&self) -> TransportHeader {
        TransportHeader::tcp(self.peer)
    }

    /// Appends received bytes to the pending buffer.
    pub(crate) fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Buffered bytes not yet consumed by the decoder.
    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }
}

impl Drop for InboundFeed {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for InboundFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundFeed")
            .field("peer", &self.peer)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

async fn read_loop<F>(socket: Arc<TcpStream>, on_event: F)
where
    F: Fn(SocketEvent),
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        if let Err(e) = socket.readable().await {
            on_event(SocketEvent::Closed(Some(e)));
            return;
        }

        buf.reserve(READ_CHUNK);
        match socket.try_read_buf(&mut buf) {
            Ok(0) => {
                on_event(SocketEvent::Closed(None));
                return;
            }
            Ok(_) => on_event(SocketEvent::Data(buf.split().freeze())),
            // Spurious readiness
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                on_event(SocketEvent::Closed(Some(e)));
                return;
            }
        }
    }
}
