// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Endpoint bookkeeping for the connector.
//!
//! The table decides what should happen next for each endpoint and returns it
//! as an [`Action`]; the connector task carries the action out. Every action
//! carries a generation number so results of cancelled attempts and timers can
//! be recognised and ignored.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// Connection state of a connector endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// A connect attempt is in flight.
    Connecting,
    /// Waiting for the backoff delay before the next attempt.
    WaitingRetry,
    /// Connected; the socket was handed to the connect callback.
    Connected,
    /// Not retried until the endpoint is added again.
    Paused,
}

impl EndpointState {
    /// Returns true if the endpoint is connected.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Work the connector task must do for an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    /// Start a connect attempt now.
    Connect {
        endpoint: SocketAddrV4,
        generation: u64,
    },
    /// Start a connect attempt after `delay`.
    Retry {
        endpoint: SocketAddrV4,
        generation: u64,
        delay: Duration,
    },
    /// Cancel whatever is pending for the endpoint.
    Cancel { endpoint: SocketAddrV4 },
}

#[derive(Debug)]
struct Entry {
    state: EndpointState,
    failed_attempts: u32,
    generation: u64,
    policy: Arc<dyn BackoffPolicy>,
}

/// Per-endpoint connection state.
#[derive(Debug, Default)]
pub(crate) struct EndpointTable {
    entries: HashMap<SocketAddrV4, Entry>,
    next_generation: u64,
}

impl EndpointTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(
        &mut self,
        endpoint: SocketAddrV4,
        policy: Arc<dyn BackoffPolicy>,
    ) -> Option<Action> {
        let generation = self.bump();

        if let Some(entry) = self.entries.get_mut(&endpoint) {
            if entry.state != EndpointState::Paused {
                return None;
            }
            entry.state = EndpointState::Connecting;
            entry.failed_attempts = 0;
            entry.generation = generation;
            entry.policy = policy;
        } else {
            self.entries.insert(
                endpoint,
                Entry {
                    state: EndpointState::Connecting,
                    failed_attempts: 0,
                    generation,
                    policy,
                },
            );
        }

        Some(Action::Connect {
            endpoint,
            generation,
        })
    }

    pub(crate) fn disconnect(&mut self, endpoint: SocketAddrV4, pause: bool) -> Option<Action> {
        let generation = self.bump();
        let entry = self.entries.get_mut(&endpoint)?;
        if entry.state != EndpointState::Connected {
            return None;
        }

        entry.generation = generation;
        if pause {
            entry.state = EndpointState::Paused;
            return Some(Action::Cancel { endpoint });
        }

        entry.state = EndpointState::WaitingRetry;
        Some(Action::Retry {
            endpoint,
            generation,
            delay: entry.policy.backoff_time(entry.failed_attempts),
        })
    }

    pub(crate) fn remove(&mut self, endpoint: SocketAddrV4) -> Option<Action> {
        self.entries
            .remove(&endpoint)
            .map(|_| Action::Cancel { endpoint })
    }

    /// Records a successful attempt. Returns false if the attempt was
    /// cancelled and its socket must be discarded.
    pub(crate) fn connect_succeeded(&mut self, endpoint: SocketAddrV4, generation: u64) -> bool {
        match self.entries.get_mut(&endpoint) {
            Some(entry)
                if entry.generation == generation && entry.state == EndpointState::Connecting =>
            {
                entry.state = EndpointState::Connected;
                entry.failed_attempts = 0;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn connect_failed(
        &mut self,
        endpoint: SocketAddrV4,
        generation: u64,
    ) -> Option<Action> {
        let next_generation = self.bump();
        let entry = self.entries.get_mut(&endpoint)?;
        if entry.generation != generation || entry.state != EndpointState::Connecting {
            return None;
        }

        entry.failed_attempts = entry.failed_attempts.saturating_add(1);
        entry.state = EndpointState::WaitingRetry;
        entry.generation = next_generation;
        Some(Action::Retry {
            endpoint,
            generation: next_generation,
            delay: entry.policy.backoff_time(entry.failed_attempts),
        })
    }

    pub(crate) fn retry_due(&mut self, endpoint: SocketAddrV4, generation: u64) -> Option<Action> {
        let next_generation = self.bump();
        let entry = self.entries.get_mut(&endpoint)?;
        if entry.generation != generation || entry.state != EndpointState::WaitingRetry {
            return None;
        }

        entry.state = EndpointState::Connecting;
        entry.generation = next_generation;
        Some(Action::Connect {
            endpoint,
            generation: next_generation,
        })
    }

    pub(crate) fn state(&self, endpoint: SocketAddrV4) -> Option<(EndpointState, u32)> {
        self.entries
            .get(&endpoint)
            .map(|entry| (entry.state, entry.failed_attempts))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}
