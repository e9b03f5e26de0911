// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tokio implementation of [`Connector`].

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::backoff::BackoffPolicy;
use crate::error::Error;

use super::endpoint::{Action, EndpointState, EndpointTable};
use super::{ConnectCallback, Connector};

/// Requests from the [`TcpConnector`] handle to its task.
enum Request {
    SetOnConnect(ConnectCallback),
    Add {
        endpoint: SocketAddrV4,
        policy: Arc<dyn BackoffPolicy>,
    },
    Disconnect {
        endpoint: SocketAddrV4,
        pause: bool,
    },
    Remove(SocketAddrV4),
    State {
        endpoint: SocketAddrV4,
        reply: oneshot::Sender<Option<(EndpointState, u32)>>,
    },
}

/// Completions of connect attempts and retry timers.
enum Completion {
    Attempt {
        endpoint: SocketAddrV4,
        generation: u64,
        result: Result<TcpStream, Error>,
    },
    RetryDue {
        endpoint: SocketAddrV4,
        generation: u64,
    },
}

/// Non-blocking TCP connector with per-endpoint retries.
///
/// All bookkeeping runs on a background task; the methods of this handle only
/// queue requests for it, so they never block. Dropping the connector stops
/// the task and every pending attempt.
///
/// # Examples
///
/// ```no_run
/// use std::net::{Ipv4Addr, SocketAddrV4};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use e133_manager::backoff::ExponentialBackoffPolicy;
/// use e133_manager::connector::{Connector, TcpConnector};
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut connector = TcpConnector::new(Duration::from_secs(5));
/// connector.set_on_connect(Box::new(|endpoint, _socket| {
///     println!("connected to {endpoint}");
/// }));
///
/// let policy = Arc::new(ExponentialBackoffPolicy::new(
///     Duration::from_secs(5),
///     Duration::from_secs(30),
/// ));
/// connector.add_endpoint(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 5569), policy);
/// # }
/// ```
#[derive(Debug)]
pub struct TcpConnector {
    requests: mpsc::UnboundedSender<Request>,
    task: JoinHandle<()>,
}

impl TcpConnector {
    /// Creates a connector whose attempts give up after `connect_timeout`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (completions, completions_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            table: EndpointTable::new(),
            connect_timeout,
            on_connect: None,
            pending: HashMap::new(),
            completions,
        };
        let task = tokio::spawn(worker.run(requests_rx, completions_rx));

        Self { requests, task }
    }

    /// Returns the state and consecutive failure count of `endpoint`, or
    /// `None` if it is not managed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManagerClosed`] if the connector task has stopped.
    pub async fn endpoint_state(
        &self,
        endpoint: SocketAddrV4,
    ) -> Result<Option<(EndpointState, u32)>, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::State { endpoint, reply });
        rx.await.map_err(|_| Error::ManagerClosed)
    }

    fn send(&self, request: Request) {
        if self.requests.send(request).is_err() {
            tracing::warn!("Connector task has stopped, request dropped");
        }
    }
}

impl Connector for TcpConnector {
    fn set_on_connect(&mut self, on_connect: ConnectCallback) {
        self.send(Request::SetOnConnect(on_connect));
    }

    fn add_endpoint(&mut self, endpoint: SocketAddrV4, policy: Arc<dyn BackoffPolicy>) {
        self.send(Request::Add { endpoint, policy });
    }

    fn disconnect(&mut self, endpoint: SocketAddrV4, pause: bool) {
        self.send(Request::Disconnect { endpoint, pause });
    }

    fn remove_endpoint(&mut self, endpoint: SocketAddrV4) {
        self.send(Request::Remove(endpoint));
    }
}

impl Drop for TcpConnector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// State owned by the connector task.
struct Worker {
    table: EndpointTable,
    connect_timeout: Duration,
    on_connect: Option<ConnectCallback>,
    /// In-flight attempt or retry timer per endpoint.
    pending: HashMap<SocketAddrV4, JoinHandle<()>>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl Worker {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                Some(completion) = completions.recv() => self.handle_completion(completion),
            }
        }

        for (_, task) in self.pending.drain() {
            task.abort();
        }
    }

    fn handle_request(&mut self, request: Request) {
        let action = match request {
            Request::SetOnConnect(on_connect) => {
                self.on_connect = Some(on_connect);
                None
            }
            Request::Add { endpoint, policy } => {
                let action = self.table.add(endpoint, policy);
                if action.is_none() {
                    tracing::debug!(%endpoint, "Endpoint already managed");
                }
                action
            }
            Request::Disconnect { endpoint, pause } => self.table.disconnect(endpoint, pause),
            Request::Remove(endpoint) => {
                let action = self.table.remove(endpoint);
                tracing::debug!(%endpoint, remaining = self.table.len(), "Endpoint removed");
                action
            }
            Request::State { endpoint, reply } => {
                let _ = reply.send(self.table.state(endpoint));
                None
            }
        };

        if let Some(action) = action {
            self.execute(action);
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Attempt {
                endpoint,
                generation,
                result: Ok(socket),
            } => {
                if !self.table.connect_succeeded(endpoint, generation) {
                    tracing::debug!(%endpoint, "Discarding connection from cancelled attempt");
                    return;
                }
                self.pending.remove(&endpoint);
                tracing::debug!(%endpoint, "Connected");

                match &self.on_connect {
                    Some(on_connect) => on_connect(endpoint, socket),
                    None => tracing::warn!(%endpoint, "No connect callback installed, closing socket"),
                }
            }
            Completion::Attempt {
                endpoint,
                generation,
                result: Err(e),
            } => {
                tracing::debug!(%endpoint, error = %e, "Connect attempt failed");
                if let Some(action) = self.table.connect_failed(endpoint, generation) {
                    self.execute(action);
                }
            }
            Completion::RetryDue {
                endpoint,
                generation,
            } => {
                if let Some(action) = self.table.retry_due(endpoint, generation) {
                    self.execute(action);
                }
            }
        }
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::Connect {
                endpoint,
                generation,
            } => {
                let timeout = self.connect_timeout;
                let completions = self.completions.clone();
                self.replace_pending(
                    endpoint,
                    tokio::spawn(async move {
                        let result = match tokio::time::timeout(timeout, TcpStream::connect(endpoint)).await {
                            Ok(Ok(socket)) => Ok(socket),
                            Ok(Err(e)) => Err(Error::Io(e)),
                            Err(_) => Err(Error::ConnectTimeout { endpoint, timeout }),
                        };
                        let _ = completions.send(Completion::Attempt {
                            endpoint,
                            generation,
                            result,
                        });
                    }),
                );
            }
            Action::Retry {
                endpoint,
                generation,
                delay,
            } => {
                tracing::debug!(
                    %endpoint,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Scheduling reconnect"
                );
                let completions = self.completions.clone();
                self.replace_pending(
                    endpoint,
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = completions.send(Completion::RetryDue {
                            endpoint,
                            generation,
                        });
                    }),
                );
            }
            Action::Cancel { endpoint } => {
                if let Some(task) = self.pending.remove(&endpoint) {
                    task.abort();
                }
            }
        }
    }

    fn replace_pending(&mut self, endpoint: SocketAddrV4, task: JoinHandle<()>) {
        if let Some(previous) = self.pending.insert(endpoint, task) {
            previous.abort();
        }
    }
}
