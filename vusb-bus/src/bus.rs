// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fan-out of core events to every registered consumer (§4.6). Each
//! subscriber gets its own bounded channel and therefore its own delivery
//! context (§5): a slow consumer never blocks a fast one, and every
//! consumer observes events in the order they were published.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use vusb_model::Event;

/// Bounded per-subscriber queue depth. A full queue means that subscriber
/// falls behind; `publish` blocks only on that subscriber's send, not on
/// the others (§5 "Shared resources").
const SUBSCRIBER_CAPACITY: usize = 1024;

/// Fans out every published [`Event`] to every subscriber, in publish
/// order, each on its own channel (§4.6).
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<SyncSender<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new consumer and returns the receiving end of its
    /// delivery context. Must be called before the events it should see
    /// are published — the bus does not replay history.
    pub fn subscribe(&mut self) -> Receiver<Event> {
        let (tx, rx) = sync_channel(SUBSCRIBER_CAPACITY);
        self.subscribers.push(tx);
        rx
    }

    /// Delivers `event` to every live subscriber. Subscribers whose
    /// receiver has been dropped are pruned rather than treated as an
    /// error — a consumer disconnecting is not a bus failure.
    pub fn publish(&mut self, event: Event) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vusb_model::{Direction, Transaction};

    #[test]
    fn every_subscriber_receives_every_event_in_order() {
        let mut bus = EventBus::new();
        let rx_a = bus.subscribe();
        let rx_b = bus.subscribe();

        let t0 = Transaction::new(Direction::Down, 0.0);
        let t1 = Transaction::new(Direction::Up, 1.0);
        bus.publish(Event::Transaction(t0.clone()));
        bus.publish(Event::Transaction(t1.clone()));

        for rx in [&rx_a, &rx_b] {
            let Event::Transaction(got0) = rx.recv().expect("event") else {
                panic!("expected transaction")
            };
            let Event::Transaction(got1) = rx.recv().expect("event") else {
                panic!("expected transaction")
            };
            assert_eq!(got0.dir, t0.dir);
            assert_eq!(got1.dir, t1.dir);
        }
    }

    #[test]
    fn dropped_subscriber_is_pruned_without_affecting_others() {
        let mut bus = EventBus::new();
        let rx_keep = bus.subscribe();
        {
            let _rx_drop = bus.subscribe();
        } // dropped immediately
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(Event::Transaction(Transaction::new(Direction::Down, 0.0)));
        assert_eq!(bus.subscriber_count(), 1);
        assert!(rx_keep.recv().is_ok());
    }
}
