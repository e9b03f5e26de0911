// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests running the full manager stack against loopback devices.
//!
//! The "device" is a plain `TcpListener` speaking a newline-delimited test
//! protocol: every line is a frame and `cmd <sequence> <endpoint> <payload>`
//! lines carry a command.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use e133_manager::error::DecodeError;
use e133_manager::event::DeviceEvent;
use e133_manager::health::HeartbeatConfig;
use e133_manager::manager::{ConnectionPhase, DeviceManager, DeviceManagerHandle, ManagerConfig};
use e133_manager::protocol::{
    Decoder, DecoderEvent, MessageBuilder, SessionHeader, StatusCode, TransportHeader,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

const DEVICE: Ipv4Addr = Ipv4Addr::LOCALHOST;
const WAIT: Duration = Duration::from_secs(5);

struct LineDecoder;

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
            events.push(DecoderEvent::RootData(*transport));

            let parts: Vec<&str> = line.splitn(4, ' ').collect();
            if let ["cmd", sequence, endpoint, payload] = parts.as_slice() {
                let sequence = sequence
                    .parse()
                    .map_err(|_| DecodeError::Malformed(line.clone()))?;
                let endpoint = endpoint
                    .parse()
                    .map_err(|_| DecodeError::Malformed(line.clone()))?;
                events.push(DecoderEvent::Request {
                    transport: *transport,
                    header: SessionHeader::new(sequence, endpoint),
                    payload: Bytes::copy_from_slice(payload.as_bytes()),
                });
            }
        }

        Ok(events)
    }
}

struct LineBuilder;

impl MessageBuilder for LineBuilder {
    fn build_status(&self, sequence: u32, endpoint: u16, code: StatusCode, description: &str) -> Bytes {
        Bytes::from(format!("status {sequence} {endpoint} {code:?} {description}\n"))
    }

    fn build_heartbeat(&self) -> Bytes {
        Bytes::from_static(b"heartbeat\n")
    }
}

/// A device listening on a random loopback port.
struct TestDevice {
    listener: TcpListener,
}

impl TestDevice {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self { listener }
    }

    fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    async fn accept(&self) -> TcpStream {
        let (stream, peer) = tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("manager did not connect")
            .unwrap();
        assert!(matches!(peer, SocketAddr::V4(_)));
        stream
    }

    /// Returns true if the manager connects within `wait`.
    async fn connects_within(&self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.listener.accept())
            .await
            .is_ok()
    }
}

/// Device side of one session.
struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Session {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    /// Next line that is not a heartbeat, or `None` on EOF or timeout.
    async fn next_message(&mut self, wait: Duration) -> Option<String> {
        tokio::time::timeout(wait, async {
            loop {
                let mut line = String::new();
                match self.reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => return None,
                    Ok(_) if line.trim_end() == "heartbeat" => {}
                    Ok(_) => return Some(line.trim_end().to_owned()),
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    /// Waits until the manager closes the session.
    async fn closed(&mut self) -> bool {
        tokio::time::timeout(WAIT, async {
            let mut line = String::new();
            loop {
                line.clear();
                match self.reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        })
        .await
        .is_ok()
    }
}

fn config(device: &TestDevice) -> ManagerConfig {
    ManagerConfig::default()
        .with_port(device.port())
        .with_connect_timeout(Duration::from_secs(1))
        .with_initial_retry_delay(Duration::from_millis(50))
        .with_max_retry_delay(Duration::from_millis(200))
}

fn start_manager(config: ManagerConfig) -> DeviceManagerHandle {
    let mut manager =
        DeviceManager::with_tcp(config, Box::new(LineDecoder), Arc::new(LineBuilder));
    manager.set_command_handler(|_, header, payload| header.sequence != 0 && payload != b"reject");
    manager.spawn()
}

async fn wait_for(events: &mut broadcast::Receiver<DeviceEvent>, expected: DeviceEvent) {
    tokio::time::timeout(WAIT, async {
        loop {
            if events.recv().await.unwrap() == expected {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {expected:?}"));
}

/// Connects the manager to `device` and makes the device designate it.
async fn designate(
    handle: &DeviceManagerHandle,
    device: &TestDevice,
    events: &mut broadcast::Receiver<DeviceEvent>,
) -> Session {
    handle.add_device(DEVICE).await.unwrap();
    let mut session = Session::new(device.accept().await);
    session.send("hello").await;
    wait_for(events, DeviceEvent::acquired(DEVICE)).await;
    session
}

#[tokio::test]
async fn designated_device_commands_are_acknowledged() {
    let device = TestDevice::start().await;
    let handle = start_manager(config(&device));
    let mut events = handle.subscribe();

    let mut session = designate(&handle, &device, &mut events).await;

    assert_eq!(handle.list_managed_devices().await.unwrap(), vec![DEVICE]);
    assert_eq!(
        handle.connection_phase(DEVICE).await.unwrap(),
        Some(ConnectionPhase::Designated)
    );

    session.send("cmd 41 0 identify").await;
    assert_eq!(
        session.next_message(WAIT).await.as_deref(),
        Some("status 41 0 Ack OK")
    );

    // Rejected by the handler, so no acknowledgement.
    session.send("cmd 42 0 reject").await;
    session.send("cmd 43 0 identify").await;
    assert_eq!(
        session.next_message(WAIT).await.as_deref(),
        Some("status 43 0 Ack OK")
    );
}

#[tokio::test]
async fn designated_device_receives_heartbeats() {
    let device = TestDevice::start().await;
    let handle = start_manager(
        config(&device).with_heartbeat(
            HeartbeatConfig::default().with_interval(Duration::from_millis(100)),
        ),
    );
    let mut events = handle.subscribe();

    let mut session = designate(&handle, &device, &mut events).await;

    let mut heartbeats = 0;
    while heartbeats < 3 {
        let mut line = String::new();
        tokio::time::timeout(WAIT, session.reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        if line.trim_end() == "heartbeat" {
            heartbeats += 1;
            // Answer so the session stays healthy.
            session.send("heartbeat").await;
        }
    }

    assert_eq!(
        handle.connection_phase(DEVICE).await.unwrap(),
        Some(ConnectionPhase::Designated)
    );
}

#[tokio::test]
async fn designated_device_is_reconnected_after_close() {
    let device = TestDevice::start().await;
    let handle = start_manager(config(&device));
    let mut events = handle.subscribe();

    let session = designate(&handle, &device, &mut events).await;
    drop(session);

    wait_for(&mut events, DeviceEvent::released(DEVICE)).await;
    assert!(handle.list_managed_devices().await.unwrap().is_empty());

    let mut session = Session::new(device.accept().await);
    session.send("hello again").await;
    wait_for(&mut events, DeviceEvent::acquired(DEVICE)).await;
}

#[tokio::test]
async fn lost_election_is_not_retried_until_added_again() {
    let device = TestDevice::start().await;
    let handle = start_manager(config(&device));
    let mut events = handle.subscribe();

    handle.add_device(DEVICE).await.unwrap();
    // The device picks another controller and hangs up without a word.
    drop(device.accept().await);
    wait_for(&mut events, DeviceEvent::disconnected(DEVICE)).await;

    assert!(!device.connects_within(Duration::from_millis(500)).await);
    assert_eq!(
        handle.connection_phase(DEVICE).await.unwrap(),
        Some(ConnectionPhase::Unconnected)
    );

    handle.add_device(DEVICE).await.unwrap();
    let mut session = Session::new(device.accept().await);
    session.send("hello").await;
    wait_for(&mut events, DeviceEvent::acquired(DEVICE)).await;
}

#[tokio::test]
async fn silent_device_is_dropped_and_reconnected() {
    let device = TestDevice::start().await;
    let handle = start_manager(
        config(&device).with_heartbeat(
            HeartbeatConfig::default().with_interval(Duration::from_millis(100)),
        ),
    );
    let mut events = handle.subscribe();

    let mut session = designate(&handle, &device, &mut events).await;

    // Never answer; the manager gives up after 250 ms.
    wait_for(&mut events, DeviceEvent::released(DEVICE)).await;
    assert!(session.closed().await);

    let _reconnected = device.accept().await;
}

#[tokio::test]
async fn removed_device_is_closed_and_forgotten() {
    let device = TestDevice::start().await;
    let handle = start_manager(config(&device));
    let mut events = handle.subscribe();

    let mut session = designate(&handle, &device, &mut events).await;

    handle.remove_device(DEVICE).await.unwrap();
    wait_for(&mut events, DeviceEvent::device_removed(DEVICE)).await;

    assert!(session.closed().await);
    assert_eq!(handle.connection_phase(DEVICE).await.unwrap(), None);
    assert!(!device.connects_within(Duration::from_millis(500)).await);
}

#[tokio::test]
async fn unreachable_device_stays_unconnected() {
    // Reserve a port, then close it so every attempt is refused.
    let device = TestDevice::start().await;
    let config = config(&device);
    drop(device);

    let handle = start_manager(config);
    handle.add_device(DEVICE).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        handle.connection_phase(DEVICE).await.unwrap(),
        Some(ConnectionPhase::Unconnected)
    );
    handle.remove_device_if_not_connected(DEVICE).await.unwrap();
    assert_eq!(handle.connection_phase(DEVICE).await.unwrap(), None);
}
