// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recording collaborators for manager tests.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};

use crate::backoff::BackoffPolicy;
use crate::connector::{ConnectCallback, Connector};
use crate::error::DecodeError;
use crate::health::{HealthMonitor, HealthMonitorFactory, UnhealthyCallback};
use crate::protocol::{
    Decoder, DecoderEvent, MessageBuilder, SessionHeader, StatusCode, TransportHeader,
};
use crate::transport::QueueHandle;

use super::{Collaborators, DeviceManager, ManagerConfig};

/// A call made on [`RecordingConnector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectorCall {
    Add(SocketAddrV4),
    Disconnect(SocketAddrV4, bool),
    Remove(SocketAddrV4),
}

/// Connector that records calls and lets the test hand over sockets.
#[derive(Clone, Default)]
pub(crate) struct ConnectorProbe {
    calls: Arc<Mutex<Vec<ConnectorCall>>>,
    on_connect: Arc<Mutex<Option<ConnectCallback>>>,
}

impl ConnectorProbe {
    pub(crate) fn calls(&self) -> Vec<ConnectorCall> {
        self.calls.lock().clone()
    }

    /// Delivers `socket` as if the connector had just connected it to the
    /// device endpoint.
    pub(crate) fn connect(&self, socket: TcpStream) {
        let on_connect = self.on_connect.lock();
        let on_connect = on_connect.as_ref().expect("manager installs a connect callback");
        on_connect(device_endpoint(), socket);
    }
}

struct RecordingConnector(ConnectorProbe);

impl Connector for RecordingConnector {
    fn set_on_connect(&mut self, on_connect: ConnectCallback) {
        *self.0.on_connect.lock() = Some(on_connect);
    }

    fn add_endpoint(&mut self, endpoint: SocketAddrV4, _policy: Arc<dyn BackoffPolicy>) {
        self.0.calls.lock().push(ConnectorCall::Add(endpoint));
    }

    fn disconnect(&mut self, endpoint: SocketAddrV4, pause: bool) {
        self.0
            .calls
            .lock()
            .push(ConnectorCall::Disconnect(endpoint, pause));
    }

    fn remove_endpoint(&mut self, endpoint: SocketAddrV4) {
        self.0.calls.lock().push(ConnectorCall::Remove(endpoint));
    }
}

/// Newline-delimited test protocol.
///
/// Every line is a root-layer frame. `cmd <sequence> <endpoint> <payload>`
/// additionally carries a request; `garbage` is a decode error.
pub(crate) struct LineDecoder;

impl Decoder for LineDecoder {
    fn decode(
        &mut self,
        transport: &TransportHeader,
        buffer: &mut BytesMut,
    ) -> Result<Vec<DecoderEvent>, DecodeError> {
        let mut events = Vec::new();

        while let Some(end) = buffer.iter().position(|&b| b == b'\n') {
            let line = buffer.split_to(end + 1);
            let line = String::from_utf8_lossy(&line[..end]).into_owned();

            if line == "garbage" {
                return Err(DecodeError::Malformed(line));
            }
            events.push(DecoderEvent::RootData(*transport));

            let mut parts = line.splitn(4, ' ');
            if parts.next() == Some("cmd") {
                let sequence = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                let endpoint = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                let payload = parts.next().unwrap_or_default().to_owned();
                events.push(DecoderEvent::Request {
                    transport: *transport,
                    header: SessionHeader::new(sequence, endpoint),
                    payload: Bytes::from(payload),
                });
            }
        }

        Ok(events)
    }
}

pub(crate) struct LineBuilder;

impl MessageBuilder for LineBuilder {
    fn build_status(&self, sequence: u32, endpoint: u16, code: StatusCode, description: &str) -> Bytes {
        Bytes::from(format!("status {sequence} {endpoint} {code:?} {description}\n"))
    }

    fn build_heartbeat(&self) -> Bytes {
        Bytes::from_static(b"heartbeat\n")
    }
}

#[derive(Default)]
struct HealthLog {
    created: usize,
    heartbeats: usize,
    fail_setup: bool,
    unhealthy: Vec<UnhealthyCallback>,
}

/// Health monitors that only count and can be failed on demand.
#[derive(Clone, Default)]
pub(crate) struct HealthProbe(Arc<Mutex<HealthLog>>);

impl HealthProbe {
    pub(crate) fn created(&self) -> usize {
        self.0.lock().created
    }

    pub(crate) fn heartbeats(&self) -> usize {
        self.0.lock().heartbeats
    }

    pub(crate) fn fail_setup(&self) {
        self.0.lock().fail_setup = true;
    }

    /// Runs the unhealthy callback of the most recent monitor.
    pub(crate) fn trigger_unhealthy(&self) {
        let callback = self.0.lock().unhealthy.pop().expect("no monitor created");
        callback();
    }
}

struct CountingMonitor(HealthProbe);

impl HealthMonitor for CountingMonitor {
    fn setup(&mut self) -> bool {
        !self.0.0.lock().fail_setup
    }

    fn heartbeat_received(&mut self) {
        self.0.0.lock().heartbeats += 1;
    }
}

struct CountingFactory(HealthProbe);

impl HealthMonitorFactory for CountingFactory {
    fn create(
        &mut self,
        _device: Ipv4Addr,
        _queue: QueueHandle,
        on_unhealthy: UnhealthyCallback,
    ) -> Box<dyn HealthMonitor> {
        let mut log = self.0.0.lock();
        log.created += 1;
        log.unhealthy.push(on_unhealthy);
        Box::new(CountingMonitor(self.0.clone()))
    }
}

/// A manager wired to recording collaborators.
pub(crate) struct Harness {
    pub(crate) manager: DeviceManager,
    pub(crate) connector: ConnectorProbe,
    pub(crate) health: HealthProbe,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let connector = ConnectorProbe::default();
        let health = HealthProbe::default();

        let manager = DeviceManager::new(
            ManagerConfig::default(),
            Collaborators {
                connector: Box::new(RecordingConnector(connector.clone())),
                decoder: Box::new(LineDecoder),
                message_builder: Arc::new(LineBuilder),
                health_monitors: Box::new(CountingFactory(health.clone())),
            },
        );

        Self {
            manager,
            connector,
            health,
        }
    }

    /// Handles manager events until `done` holds.
    pub(crate) async fn pump_until(&mut self, mut done: impl FnMut(&DeviceManager) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done(&self.manager) {
                let event = self.manager.next_event().await.expect("event channel open");
                self.manager.handle_event(event);
            }
        })
        .await
        .expect("timed out waiting for manager state");
    }

    /// Opens a loopback session, hands our side to the manager and returns the
    /// device side.
    pub(crate) async fn connect_device(&mut self) -> TcpStream {
        let (controller, device) = socket_pair().await;
        self.connector.connect(controller);
        self.pump_until(|m| m.connection_phase(device_address()).is_some_and(|p| p.is_connected()))
            .await;
        device
    }
}

/// The address every loopback session appears to come from.
pub(crate) fn device_address() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

pub(crate) fn device_endpoint() -> SocketAddrV4 {
    SocketAddrV4::new(device_address(), crate::protocol::E133_PORT)
}

/// Returns a connected (controller, device) pair over loopback.
pub(crate) async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let controller = TcpStream::connect(listener.local_addr().unwrap())
        .await
        .unwrap();
    let (device, _) = listener.accept().await.unwrap();
    (controller, device)
}

/// Returns our side of a session the device has already reset.
///
/// The device closes with unread data pending, so its kernel answers with a
/// reset and our socket loses its peer address.
pub(crate) async fn reset_session() -> TcpStream {
    use tokio::io::AsyncWriteExt;

    let (mut controller, device) = socket_pair().await;
    controller.write_all(b"unread\n").await.unwrap();
    device.readable().await.unwrap();
    drop(device);

    tokio::time::timeout(Duration::from_secs(5), async {
        while controller.peer_addr().is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was not reset");
    controller
}

/// Reads one line from `socket`, or `None` if nothing arrives within `wait`.
pub(crate) async fn read_line(socket: &mut TcpStream, wait: Duration) -> Option<String> {
    use tokio::io::AsyncReadExt;

    let mut line = Vec::new();
    let read = tokio::time::timeout(wait, async {
        let mut byte = [0u8; 1];
        loop {
            match socket.read(&mut byte).await {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(_) if byte[0] == b'\n' => return Ok(()),
                Ok(_) => line.push(byte[0]),
                Err(e) => return Err(e),
            }
        }
    })
    .await;

    match read {
        Ok(Ok(())) => Some(String::from_utf8_lossy(&line).into_owned()),
        _ => None,
    }
}
