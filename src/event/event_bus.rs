// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event bus for broadcasting device events.

use tokio::sync::broadcast;

use super::DeviceEvent;

/// Default channel capacity for the event bus.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Event bus for broadcasting device events to multiple subscribers.
///
/// Publishing never blocks the manager task. Each subscriber gets its own
/// copy of every event sent after it subscribed.
///
/// # Capacity
///
/// The bus has a fixed capacity (default 256, see
/// [`ManagerConfig::event_capacity`](crate::manager::ManagerConfig::event_capacity)).
/// A subscriber that falls behind by more than that skips the oldest events and
/// sees `RecvError::Lagged`.
///
/// # Examples
///
/// ```
/// use std::net::Ipv4Addr;
/// use e133_manager::event::{DeviceEvent, EventBus};
///
/// let bus = EventBus::new();
///
/// // Create a subscriber
/// let mut rx = bus.subscribe();
///
/// // Publish an event
/// bus.publish(DeviceEvent::DeviceAdded {
///     address: Ipv4Addr::new(10, 0, 0, 5),
/// });
///
/// // Multiple subscribers can exist
/// let mut rx2 = bus.subscribe();
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DeviceEvent>,
}

impl EventBus {
    /// Creates a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new event bus with the specified capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events that can be buffered
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to device events.
    ///
    /// Returns a receiver that will receive all events published after
    /// the subscription is created.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes an event to all subscribers.
    ///
    /// If there are no subscribers, the event is silently discarded.
    /// If the channel is full for a slow subscriber, that subscriber
    /// will lose events.
    pub fn publish(&self, event: DeviceEvent) {
        tracing::trace!(?event, "Publishing device event");
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use tokio::sync::broadcast::error::RecvError;

    fn address() -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, 5)
    }

    #[test]
    fn new_bus_has_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn subscribe_increments_count() {
        let bus = EventBus::new();

        let _rx1 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn drop_subscriber_decrements_count() {
        let bus = EventBus::new();

        let rx1 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        drop(rx1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn publish_delivers_to_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(DeviceEvent::device_added(address()));

        assert_eq!(rx1.recv().await.unwrap().address(), address());
        assert_eq!(rx2.recv().await.unwrap().address(), address());
    }

    #[test]
    fn publish_without_subscribers_is_ignored() {
        let bus = EventBus::new();
        bus.publish(DeviceEvent::device_added(address()));
    }

    #[tokio::test]
    async fn slow_subscriber_lags() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();

        bus.publish(DeviceEvent::device_added(address()));
        bus.publish(DeviceEvent::connected(address()));
        bus.publish(DeviceEvent::acquired(address()));

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(1))));
        assert_eq!(rx.recv().await.unwrap(), DeviceEvent::connected(address()));
    }

    #[test]
    fn clone_shares_same_channel() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();

        let _rx = bus1.subscribe();
        // Subscriber from bus1 should be visible in bus2
        assert_eq!(bus2.subscriber_count(), 1);
    }
}
