use std::sync::mpsc::Sender;

use crate::scene::SceneMessage;

/// A consumer of scene mutations. Returns `false` once the consumer is gone.
pub trait SceneSink: Send {
    fn deliver(&self, message: SceneMessage) -> bool;
}

impl<T> SceneSink for Sender<T>
where
    T: From<SceneMessage> + Send,
{
    fn deliver(&self, message: SceneMessage) -> bool {
        self.send(T::from(message)).is_ok()
    }
}

struct Subscriber {
    name: String,
    sink: Box<dyn SceneSink>,
}

/// Ordered fan-out of scene messages, one queue per consumer.
///
/// Each consumer receives messages in publish order; there is no ordering
/// across consumers.
#[derive(Default)]
pub struct SceneBus {
    subscribers: Vec<Subscriber>,
}

impl SceneBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, name: impl Into<String>, sink: impl SceneSink + 'static) {
        let name = name.into();
        log::debug!("scene bus: {} subscribed", name);
        self.subscribers.push(Subscriber {
            name,
            sink: Box::new(sink),
        });
    }

    pub fn publish(&mut self, message: SceneMessage) {
        let Some((last, rest)) = self.subscribers.split_last() else {
            return;
        };

        let mut gone = Vec::new();
        for (index, subscriber) in rest.iter().enumerate() {
            if !subscriber.sink.deliver(message.clone()) {
                gone.push(index);
            }
        }
        if !last.sink.deliver(message) {
            gone.push(rest.len());
        }

        for index in gone.into_iter().rev() {
            let subscriber = self.subscribers.remove(index);
            log::warn!("scene bus: {} disconnected, unsubscribing", subscriber.name);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl std::fmt::Debug for SceneBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.subscribers.iter().map(|s| &s.name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::scene::EntityId;

    #[test]
    fn fan_out_preserves_order() {
        let mut bus = SceneBus::new();
        let (tx_a, rx_a) = mpsc::channel::<SceneMessage>();
        let (tx_b, rx_b) = mpsc::channel::<SceneMessage>();
        bus.subscribe("a", tx_a);
        bus.subscribe("b", tx_b);

        for id in 1..=3 {
            bus.publish(SceneMessage::RemoveEntity { id: EntityId(id) });
        }

        for rx in [rx_a, rx_b] {
            let ids: Vec<_> = rx.try_iter().filter_map(|m| m.entity_id()).collect();
            assert_eq!(ids, vec![EntityId(1), EntityId(2), EntityId(3)]);
        }
    }

    #[test]
    fn dropped_consumer_is_unsubscribed() {
        let mut bus = SceneBus::new();
        let (tx, rx) = mpsc::channel::<SceneMessage>();
        let (tx_kept, _rx_kept) = mpsc::channel::<SceneMessage>();
        bus.subscribe("gone", tx);
        bus.subscribe("kept", tx_kept);
        drop(rx);

        bus.publish(SceneMessage::RemoveEntity { id: EntityId(1) });
        assert_eq!(bus.subscriber_count(), 1);
    }
}
