// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound message queue bound to a device socket.

use std::io;
use std::net::SocketAddrV4;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Cloneable sender side of a device's outbound queue.
///
/// Handed to the health monitor so it can send heartbeats on the same
/// connection the manager acknowledges commands on.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl QueueHandle {
    /// Creates a handle and the receiver its messages are delivered to.
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues an encoded message for transmission.
    ///
    /// Returns `false` if the connection is gone and the message was dropped.
    pub fn send_message(&self, message: Bytes) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Returns true if the queue no longer accepts messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Outbound queue for one designated device connection.
///
/// Messages are written in order by a dedicated writer task. Dropping the
/// queue stops the writer; anything still queued is discarded.
pub(crate) struct MessageQueue {
    handle: QueueHandle,
    writer: JoinHandle<()>,
}

impl MessageQueue {
    /// Creates a queue writing to `socket`.
    pub(crate) fn new(peer: SocketAddrV4, socket: Arc<TcpStream>) -> Self {
        let (handle, mut rx) = QueueHandle::channel();

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = write_all(&socket, &message).await {
                    tracing::warn!(%peer, error = %e, "Failed to send message");
                    break;
                }
            }
            tracing::debug!(%peer, "Outbound queue stopped");
        });

        Self { handle, writer }
    }

    /// Returns a handle for queuing messages.
    pub(crate) fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    /// Queues an encoded message for transmission.
    pub(crate) fn send_message(&self, message: Bytes) -> bool {
        self.handle.send_message(message)
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("closed", &self.handle.is_closed())
            .finish_non_exhaustive()
    }
}

async fn write_all(socket: &TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        socket.writable().await?;
        match socket.try_write(data) {
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
