// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cloneable handle to a running device manager.

use std::net::Ipv4Addr;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::{Error, Result};
use crate::event::{DeviceEvent, EventBus};
use crate::protocol::{SessionHeader, TransportHeader};

use super::device_manager::{CommandHandler, DeviceCallback};
use super::device_state::ConnectionPhase;

/// Requests from a [`DeviceManagerHandle`] to the manager task.
pub(crate) enum Request {
    AddDevice(Ipv4Addr),
    RemoveDevice(Ipv4Addr),
    RemoveDeviceIfNotConnected(Ipv4Addr),
    ListManagedDevices(oneshot::Sender<Vec<Ipv4Addr>>),
    ConnectionPhase {
        address: Ipv4Addr,
        reply: oneshot::Sender<Option<ConnectionPhase>>,
    },
    SetCommandHandler(CommandHandler),
    SetAcquireDeviceCallback(DeviceCallback),
    SetReleaseDeviceCallback(DeviceCallback),
}

/// Handle to a [`DeviceManager`](super::DeviceManager) running on its own
/// task.
///
/// Requests are processed in the order they are sent. The manager task stops
/// once every clone of the handle has been dropped.
///
/// # Examples
///
/// ```no_run
/// use std::net::Ipv4Addr;
/// use e133_manager::event::DeviceEvent;
/// use e133_manager::manager::DeviceManagerHandle;
///
/// # async fn example(handle: DeviceManagerHandle) -> e133_manager::Result<()> {
/// let mut events = handle.subscribe();
/// handle.add_device(Ipv4Addr::new(192, 168, 1, 40)).await?;
///
/// while let Ok(event) = events.recv().await {
///     if let DeviceEvent::DesignationChanged { address, designated: true } = event {
///         println!("now controlling {address}");
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DeviceManagerHandle {
    requests: mpsc::Sender<Request>,
    event_bus: EventBus,
}

impl DeviceManagerHandle {
    pub(crate) fn new(requests: mpsc::Sender<Request>, event_bus: EventBus) -> Self {
        Self {
            requests,
            event_bus,
        }
    }

    /// Starts managing the device at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManagerClosed`] if the manager task has stopped.
    pub async fn add_device(&self, address: Ipv4Addr) -> Result<()> {
        self.send(Request::AddDevice(address)).await
    }

    /// Stops managing the device at `address`, closing any open session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManagerClosed`] if the manager task has stopped.
    pub async fn remove_device(&self, address: Ipv4Addr) -> Result<()> {
        self.send(Request::RemoveDevice(address)).await
    }

    /// Stops managing the device at `address` unless a session to it is open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManagerClosed`] if the manager task has stopped.
    pub async fn remove_device_if_not_connected(&self, address: Ipv4Addr) -> Result<()> {
        self.send(Request::RemoveDeviceIfNotConnected(address)).await
    }

    /// Returns the devices this controller is designated for.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManagerClosed`] if the manager task has stopped.
    pub async fn list_managed_devices(&self) -> Result<Vec<Ipv4Addr>> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::ListManagedDevices(reply)).await?;
        rx.await.map_err(|_| Error::ManagerClosed)
    }

    /// Returns the connection phase of the device at `address`, or `None` if
    /// it is not managed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManagerClosed`] if the manager task has stopped.
    pub async fn connection_phase(&self, address: Ipv4Addr) -> Result<Option<ConnectionPhase>> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::ConnectionPhase { address, reply }).await?;
        rx.await.map_err(|_| Error::ManagerClosed)
    }

    /// Replaces the handler for commands addressed to the root endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManagerClosed`] if the manager task has stopped.
    pub async fn set_command_handler<F>(&self, handler: F) -> Result<()>
    where
        F: FnMut(&TransportHeader, &SessionHeader, &[u8]) -> bool + Send + 'static,
    {
        self.send(Request::SetCommandHandler(Box::new(handler))).await
    }

    /// Replaces the callback run when this controller becomes designated for
    /// a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManagerClosed`] if the manager task has stopped.
    pub async fn set_acquire_device_callback<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(Ipv4Addr) + Send + 'static,
    {
        self.send(Request::SetAcquireDeviceCallback(Box::new(callback)))
            .await
    }

    /// Replaces the callback run when this controller stops being designated
    /// for a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManagerClosed`] if the manager task has stopped.
    pub async fn set_release_device_callback<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(Ipv4Addr) + Send + 'static,
    {
        self.send(Request::SetReleaseDeviceCallback(Box::new(callback)))
            .await
    }

    /// Subscribes to device events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_bus.subscribe()
    }

    /// Returns true if the manager task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    async fn send(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| Error::ManagerClosed)
    }
}
