// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device manager maintaining sessions to E1.33 devices.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};

use crate::backoff::BackoffPolicy;
use crate::connector::{Connector, TcpConnector};
use crate::error::Error;
use crate::event::{DeviceEvent, EventBus};
use crate::health::{HealthMonitorFactory, HeartbeatMonitorFactory};
use crate::protocol::{
    Decoder, DecoderEvent, MessageBuilder, ROOT_ENDPOINT, SessionHeader, StatusCode,
    TransportHeader,
};
use crate::transport::{InboundFeed, MessageQueue, SocketEvent};

use super::config::ManagerConfig;
use super::device_state::{ConnectionId, ConnectionPhase, DeviceState};
use super::election::{self, InboundSignal};
use super::handle::{DeviceManagerHandle, Request};

/// Handler for commands addressed to the root endpoint.
///
/// Receives the transport header, the session header and the command payload.
/// Returning `true` makes the manager acknowledge the command to the device.
pub type CommandHandler =
    Box<dyn FnMut(&TransportHeader, &SessionHeader, &[u8]) -> bool + Send>;

/// Callback receiving a device address, used for designation changes.
pub type DeviceCallback = Box<dyn FnMut(Ipv4Addr) + Send>;

/// The pluggable parts of a [`DeviceManager`].
pub struct Collaborators {
    /// Keeps device endpoints connected.
    pub connector: Box<dyn Connector>,
    /// Decodes the inbound byte stream of every session.
    pub decoder: Box<dyn Decoder>,
    /// Encodes acknowledgements.
    pub message_builder: Arc<dyn MessageBuilder>,
    /// Creates a health monitor for each designated session.
    pub health_monitors: Box<dyn HealthMonitorFactory>,
}

/// Inputs to the manager from its own background tasks.
#[derive(Debug)]
pub(crate) enum ManagerEvent {
    /// The connector opened a session to `endpoint`.
    Connected {
        endpoint: SocketAddrV4,
        socket: TcpStream,
    },
    /// Bytes arrived on a session.
    Data {
        address: Ipv4Addr,
        connection: ConnectionId,
        data: Bytes,
    },
    /// A session was closed by the peer or failed.
    Closed {
        address: Ipv4Addr,
        connection: ConnectionId,
        error: Option<io::Error>,
    },
    /// A session's health monitor timed out.
    Unhealthy {
        address: Ipv4Addr,
        connection: ConnectionId,
    },
}

/// Maintains TCP sessions to a set of E1.33 devices and tracks for which of
/// them this controller is the designated controller.
///
/// The manager is a plain state machine: every input is handled to completion
/// before the next one. It normally runs on its own task, started with
/// [`spawn`](Self::spawn), and is driven through the returned
/// [`DeviceManagerHandle`].
///
/// # Device lifecycle
///
/// 1. [`add_device`](Self::add_device) registers the device with the
///    connector, which keeps trying to connect.
/// 2. Once connected, received bytes are fed to the decoder.
/// 3. The first root-layer message over TCP means the device chose us: the
///    acquire callback runs and a health monitor is attached to the session.
/// 4. If the session of a designated device closes or goes quiet, the release
///    callback runs and the connector reconnects after its backoff delay. If
///    the device closes the session before sending anything another controller
///    won, and the endpoint is parked until the device is added again.
///
/// # Examples
///
/// ```no_run
/// use std::net::Ipv4Addr;
/// use std::sync::Arc;
/// use bytes::{Bytes, BytesMut};
/// use e133_manager::error::DecodeError;
/// use e133_manager::manager::{DeviceManager, ManagerConfig};
/// use e133_manager::protocol::{Decoder, DecoderEvent, MessageBuilder, StatusCode, TransportHeader};
///
/// struct MyDecoder;
/// impl Decoder for MyDecoder {
///     fn decode(&mut self, _: &TransportHeader, _: &mut BytesMut)
///         -> Result<Vec<DecoderEvent>, DecodeError> {
///         Ok(Vec::new())
///     }
/// }
///
/// struct MyBuilder;
/// impl MessageBuilder for MyBuilder {
///     fn build_status(&self, _: u32, _: u16, _: StatusCode, _: &str) -> Bytes { Bytes::new() }
///     fn build_heartbeat(&self) -> Bytes { Bytes::new() }
/// }
///
/// #[tokio::main]
/// async fn main() -> e133_manager::Result<()> {
///     let mut manager = DeviceManager::with_tcp(
///         ManagerConfig::default(),
///         Box::new(MyDecoder),
///         Arc::new(MyBuilder),
///     );
///     manager.set_acquire_device_callback(|address| println!("acquired {address}"));
///
///     let handle = manager.spawn();
///     handle.add_device(Ipv4Addr::new(192, 168, 1, 40)).await?;
///     Ok(())
/// }
/// ```
pub struct DeviceManager {
    config: ManagerConfig,
    backoff: Arc<dyn BackoffPolicy>,
    connector: Box<dyn Connector>,
    decoder: Box<dyn Decoder>,
    message_builder: Arc<dyn MessageBuilder>,
    health_monitors: Box<dyn HealthMonitorFactory>,
    /// Managed devices, keyed by address.
    devices: HashMap<Ipv4Addr, DeviceState>,
    command_handler: Option<CommandHandler>,
    on_acquire: Option<DeviceCallback>,
    on_release: Option<DeviceCallback>,
    event_bus: EventBus,
    events_tx: mpsc::UnboundedSender<ManagerEvent>,
    events_rx: mpsc::UnboundedReceiver<ManagerEvent>,
    next_connection: ConnectionId,
}

impl DeviceManager {
    /// Creates a manager from its collaborators.
    ///
    /// Installs the manager's connect callback on the connector.
    #[must_use]
    pub fn new(config: ManagerConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            mut connector,
            decoder,
            message_builder,
            health_monitors,
        } = collaborators;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let on_connect = events_tx.clone();
        connector.set_on_connect(Box::new(move |endpoint, socket| {
            let _ = on_connect.send(ManagerEvent::Connected { endpoint, socket });
        }));

        let backoff = config.backoff_policy();
        let event_bus = EventBus::with_capacity(config.event_capacity.max(1));

        Self {
            config,
            backoff,
            connector,
            decoder,
            message_builder,
            health_monitors,
            devices: HashMap::new(),
            command_handler: None,
            on_acquire: None,
            on_release: None,
            event_bus,
            events_tx,
            events_rx,
            next_connection: ConnectionId::first(),
        }
    }

    /// Creates a manager using [`TcpConnector`] and heartbeat health
    /// monitoring, configured from `config`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn with_tcp(
        config: ManagerConfig,
        decoder: Box<dyn Decoder>,
        message_builder: Arc<dyn MessageBuilder>,
    ) -> Self {
        let connector = TcpConnector::new(config.connect_timeout);
        let health_monitors =
            HeartbeatMonitorFactory::new(config.heartbeat.clone(), Arc::clone(&message_builder));

        Self::new(
            config,
            Collaborators {
                connector: Box::new(connector),
                decoder,
                message_builder,
                health_monitors: Box::new(health_monitors),
            },
        )
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    /// Sets the handler for commands addressed to the root endpoint.
    ///
    /// Without a handler commands are dropped and never acknowledged.
    pub fn set_command_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&TransportHeader, &SessionHeader, &[u8]) -> bool + Send + 'static,
    {
        self.command_handler = Some(Box::new(handler));
    }

    /// Sets the callback run when this controller becomes the designated
    /// controller for a device.
    pub fn set_acquire_device_callback<F>(&mut self, callback: F)
    where
        F: FnMut(Ipv4Addr) + Send + 'static,
    {
        self.on_acquire = Some(Box::new(callback));
    }

    /// Sets the callback run when this controller stops being the designated
    /// controller for a device.
    pub fn set_release_device_callback<F>(&mut self, callback: F)
    where
        F: FnMut(Ipv4Addr) + Send + 'static,
    {
        self.on_release = Some(Box::new(callback));
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Subscribes to device events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_bus.subscribe()
    }

    // =========================================================================
    // Device Management
    // =========================================================================

    /// Starts managing the device at `address`.
    ///
    /// Adding a device that is already managed does nothing, unless its
    /// endpoint was parked after another controller won it; then connection
    /// attempts resume.
    pub fn add_device(&mut self, address: Ipv4Addr) {
        let endpoint = self.endpoint(address);

        match self.devices.get_mut(&address) {
            Some(device) if device.paused => {
                tracing::info!(%address, "Resuming connection attempts to device");
                device.paused = false;
                self.connector
                    .add_endpoint(endpoint, Arc::clone(&self.backoff));
            }
            Some(_) => {
                tracing::debug!(%address, "Device already managed");
            }
            None => {
                tracing::info!(%address, "Adding device");
                self.devices.insert(address, DeviceState::new(address));
                self.connector
                    .add_endpoint(endpoint, Arc::clone(&self.backoff));
                self.event_bus.publish(DeviceEvent::device_added(address));
            }
        }
    }

    /// Stops managing the device at `address`.
    ///
    /// Any open session is closed immediately and pending reconnects are
    /// cancelled. If this controller was designated the release callback runs.
    pub fn remove_device(&mut self, address: Ipv4Addr) {
        let endpoint = self.endpoint(address);
        let Some(mut device) = self.devices.remove(&address) else {
            tracing::debug!(%address, "Remove requested for unmanaged device");
            return;
        };

        if device.designated {
            device.designated = false;
            if let Some(on_release) = self.on_release.as_mut() {
                on_release(address);
            }
            self.event_bus.publish(DeviceEvent::released(address));
        }

        self.connector.remove_endpoint(endpoint);

        let was_connected = device.socket.is_some();
        device.release_connection();
        drop(device);

        if was_connected {
            self.event_bus.publish(DeviceEvent::disconnected(address));
        }
        self.event_bus.publish(DeviceEvent::device_removed(address));
        tracing::info!(%address, "Removed device");
    }

    /// Removes the device at `address` unless a session to it is open.
    pub fn remove_device_if_not_connected(&mut self, address: Ipv4Addr) {
        let Some(device) = self.devices.get(&address) else {
            tracing::debug!(%address, "Remove requested for unmanaged device");
            return;
        };
        if device.socket.is_some() {
            tracing::debug!(%address, "Device connected, not removing");
            return;
        }

        self.remove_device(address);
    }

    /// Returns the devices this controller is designated for.
    #[must_use]
    pub fn list_managed_devices(&self) -> Vec<Ipv4Addr> {
        self.devices
            .iter()
            .filter(|(_, device)| device.designated)
            .map(|(address, _)| *address)
            .collect()
    }

    /// Returns the connection phase of the device at `address`, or `None` if
    /// it is not managed.
    #[must_use]
    pub fn connection_phase(&self, address: Ipv4Addr) -> Option<ConnectionPhase> {
        self.devices.get(&address).map(DeviceState::phase)
    }

    // =========================================================================
    // Event Loop
    // =========================================================================

    /// Moves the manager onto its own task and returns a handle to it.
    ///
    /// The task stops, closing every session, once all handles are dropped.
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(self) -> DeviceManagerHandle {
        let (requests, requests_rx) = mpsc::channel(self.config.request_capacity.max(1));
        let event_bus = self.event_bus.clone();

        tokio::spawn(self.run(requests_rx));

        DeviceManagerHandle::new(requests, event_bus)
    }

    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        tracing::debug!("Device manager started");

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }

        tracing::debug!(
            devices = self.devices.len(),
            "All handles dropped, device manager stopping"
        );
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::AddDevice(address) => self.add_device(address),
            Request::RemoveDevice(address) => self.remove_device(address),
            Request::RemoveDeviceIfNotConnected(address) => {
                self.remove_device_if_not_connected(address);
            }
            Request::ListManagedDevices(reply) => {
                let _ = reply.send(self.list_managed_devices());
            }
            Request::ConnectionPhase { address, reply } => {
                let _ = reply.send(self.connection_phase(address));
            }
            Request::SetCommandHandler(handler) => self.command_handler = Some(handler),
            Request::SetAcquireDeviceCallback(callback) => self.on_acquire = Some(callback),
            Request::SetReleaseDeviceCallback(callback) => self.on_release = Some(callback),
        }
    }

    /// Waits for the next event from the connector, a reader task or a health
    /// monitor.
    pub(crate) async fn next_event(&mut self) -> Option<ManagerEvent> {
        self.events_rx.recv().await
    }

    pub(crate) fn handle_event(&mut self, event: ManagerEvent) {
        let address = match event {
            ManagerEvent::Connected { endpoint, socket } => self.on_connect(endpoint, socket),
            ManagerEvent::Data {
                address,
                connection,
                data,
            } => {
                self.on_data(address, connection, &data);
                Some(address)
            }
            ManagerEvent::Closed {
                address,
                connection,
                error,
            } => {
                self.on_closed(address, connection, error.as_ref());
                Some(address)
            }
            ManagerEvent::Unhealthy {
                address,
                connection,
            } => {
                self.on_unhealthy(address, connection);
                Some(address)
            }
        };

        if let Some(address) = address
            && let Some(device) = self.devices.get(&address)
            && !device.is_consistent()
        {
            tracing::error!(%address, ?device, "Invariant violation: designated device is missing session resources");
        }
    }

    // =========================================================================
    // Session Events
    // =========================================================================

    fn on_connect(&mut self, endpoint: SocketAddrV4, socket: TcpStream) -> Option<Ipv4Addr> {
        let address = *endpoint.ip();

        let Some(device) = self.devices.get_mut(&address) else {
            report_missing_device(address, "connect");
            return None;
        };
        if device.socket.is_some() {
            tracing::warn!(%address, "Device already has an open session, closing new connection");
            return Some(address);
        }
        // A peer that reset the connection before we got here has no address.
        if let Err(e) = socket.peer_addr() {
            tracing::warn!(%address, error = %e, "Session failed before setup, closing connection");
            drop(socket);
            self.socket_closed(address);
            return Some(address);
        }

        let connection = self.next_connection.take_next();
        let socket = Arc::new(socket);
        let events = self.events_tx.clone();
        let feed = InboundFeed::start(endpoint, Arc::clone(&socket), move |event| {
            let event = match event {
                SocketEvent::Data(data) => ManagerEvent::Data {
                    address,
                    connection,
                    data,
                },
                SocketEvent::Closed(error) => ManagerEvent::Closed {
                    address,
                    connection,
                    error,
                },
            };
            let _ = events.send(event);
        });

        device.socket = Some(socket);
        device.inbound_feed = Some(feed);
        device.connection = Some(connection);

        tracing::info!(%address, %connection, "Connected to device");
        self.event_bus.publish(DeviceEvent::connected(address));
        Some(address)
    }

    fn on_data(&mut self, address: Ipv4Addr, connection: ConnectionId, data: &[u8]) {
        let Some(device) = self.devices.get_mut(&address) else {
            report_missing_device(address, "data");
            return;
        };
        if !device.is_current(connection) {
            tracing::debug!(%address, %connection, "Dropping data from closed session");
            return;
        }
        let Some(feed) = device.inbound_feed.as_mut() else {
            return;
        };

        feed.push(data);
        let transport = feed.transport_header();

        match self.decoder.decode(&transport, feed.buffer_mut()) {
            Ok(events) => {
                for event in events {
                    if !self.is_current(address, connection) {
                        tracing::debug!(%address, "Session closed, dropping remaining messages");
                        break;
                    }
                    self.dispatch(event);
                }
            }
            Err(e) => {
                let error = Error::from(e);
                tracing::warn!(%address, %error, "Corrupt stream from device, closing connection");
                self.socket_closed(address);
            }
        }
    }

    fn on_closed(&mut self, address: Ipv4Addr, connection: ConnectionId, error: Option<&io::Error>) {
        let Some(device) = self.devices.get(&address) else {
            report_missing_device(address, "close");
            return;
        };
        if !device.is_current(connection) {
            tracing::debug!(%address, %connection, "Ignoring close of stale session");
            return;
        }

        match error {
            Some(e) => tracing::info!(%address, error = %e, "Connection to device failed"),
            None => tracing::debug!(%address, "Device closed connection"),
        }
        self.socket_closed(address);
    }

    fn on_unhealthy(&mut self, address: Ipv4Addr, connection: ConnectionId) {
        let Some(device) = self.devices.get(&address) else {
            report_missing_device(address, "unhealthy");
            return;
        };
        if !device.is_current(connection) {
            tracing::debug!(%address, %connection, "Ignoring health timeout of stale session");
            return;
        }

        tracing::info!(%address, "Device stopped responding, closing connection");
        self.socket_closed(address);
    }

    fn dispatch(&mut self, event: DecoderEvent) {
        match event {
            DecoderEvent::RootData(transport) => self.root_data_received(&transport),
            DecoderEvent::Request {
                transport,
                header,
                payload,
            } => self.endpoint_request(&transport, &header, &payload),
        }
    }

    /// Handles any root-layer message; drives election and heartbeats.
    fn root_data_received(&mut self, transport: &TransportHeader) {
        let address = transport.source_ip();
        let Some(device) = self.devices.get_mut(&address) else {
            report_missing_device(address, "root data");
            return;
        };

        match election::classify(transport, device.designated) {
            InboundSignal::Ignore => {
                tracing::debug!(%address, transport = %transport.transport(), "Ignoring root data");
            }
            InboundSignal::Heartbeat => {
                if let Some(monitor) = device.health_monitor.as_mut() {
                    monitor.heartbeat_received();
                }
            }
            InboundSignal::Elected => self.become_designated(address, transport.source()),
        }
    }

    fn become_designated(&mut self, address: Ipv4Addr, peer: SocketAddrV4) {
        let Some(device) = self.devices.get_mut(&address) else {
            return;
        };
        let (Some(socket), Some(connection)) = (device.socket.clone(), device.connection) else {
            tracing::warn!(%address, "Root data from device without an open session");
            return;
        };

        device.designated = true;
        tracing::info!(%address, "Designated controller for device");
        if let Some(on_acquire) = self.on_acquire.as_mut() {
            on_acquire(address);
        }
        self.event_bus.publish(DeviceEvent::acquired(address));

        let queue = MessageQueue::new(peer, socket);
        let events = self.events_tx.clone();
        let mut monitor = self.health_monitors.create(
            address,
            queue.handle(),
            Box::new(move || {
                let _ = events.send(ManagerEvent::Unhealthy {
                    address,
                    connection,
                });
            }),
        );
        let started = monitor.setup();
        device.outbound_queue = Some(queue);
        device.health_monitor = Some(monitor);

        if !started {
            tracing::warn!(%address, "Failed to start health monitor, closing connection");
            self.socket_closed(address);
        }
    }

    /// Handles a command; acknowledges it if the handler accepts it.
    fn endpoint_request(&mut self, transport: &TransportHeader, header: &SessionHeader, payload: &[u8]) {
        let address = transport.source_ip();
        if header.endpoint != ROOT_ENDPOINT {
            tracing::debug!(%address, endpoint = header.endpoint, "No handler for endpoint, dropping request");
            return;
        }

        let Some(handler) = self.command_handler.as_mut() else {
            return;
        };
        if !handler(transport, header, payload) {
            return;
        }

        let Some(device) = self.devices.get(&address) else {
            tracing::warn!(%address, "Unable to find device state to acknowledge request");
            return;
        };
        let Some(queue) = device.outbound_queue.as_ref() else {
            tracing::warn!(%address, "Device has no outbound queue, acknowledgement dropped");
            return;
        };

        let ack = self
            .message_builder
            .build_status(header.sequence, header.endpoint, StatusCode::Ack, "OK");
        if !queue.send_message(ack) {
            tracing::debug!(%address, sequence = header.sequence, "Outbound queue closed, acknowledgement dropped");
        }
    }

    /// Tears down the session of `address`.
    ///
    /// A designated device is released and retried. A device that closed the
    /// session before designating us picked another controller; its endpoint
    /// is parked.
    fn socket_closed(&mut self, address: Ipv4Addr) {
        let endpoint = self.endpoint(address);
        let Some(device) = self.devices.get_mut(&address) else {
            report_missing_device(address, "close");
            return;
        };

        if device.designated {
            tracing::info!(%address, "Lost connection to designated device, will reconnect");
            device.designated = false;
            if let Some(on_release) = self.on_release.as_mut() {
                on_release(address);
            }
            self.event_bus.publish(DeviceEvent::released(address));
            self.connector.disconnect(endpoint, false);
        } else {
            tracing::info!(%address, "Device chose another controller, not reconnecting");
            device.paused = true;
            self.connector.disconnect(endpoint, true);
        }

        let was_connected = device.socket.is_some();
        device.release_connection();
        if was_connected {
            self.event_bus.publish(DeviceEvent::disconnected(address));
        }
    }

    fn is_current(&self, address: Ipv4Addr, connection: ConnectionId) -> bool {
        self.devices
            .get(&address)
            .is_some_and(|device| device.is_current(connection))
    }

    fn endpoint(&self, address: Ipv4Addr) -> SocketAddrV4 {
        SocketAddrV4::new(address, self.config.port)
    }
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("config", &self.config)
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

fn report_missing_device(address: Ipv4Addr, event: &'static str) {
    tracing::error!(%address, event, "Invariant violation: no state for device");
}
