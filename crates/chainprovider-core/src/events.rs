//! Topic-keyed listener registry.
//!
//! Static lifecycle channels and one channel per active subscription id all
//! live in the same map. The registry only stores callbacks; invoking them
//! happens through [`Emission::deliver`] after the provider has released its
//! state lock, so a callback may call back into the provider.
//!
//! Channel listeners (see [`EventRegistry::add_channel`]) stop counting once
//! their receiver is dropped and are pruned on the next registration.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::subscriptions::SubscriptionId;

/// An event channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Connect,
    Close,
    NetworkChanged,
    AccountsChanged,
    /// Push notifications (or the synthetic close error) of one subscription.
    Subscription(SubscriptionId),
}

impl From<SubscriptionId> for Topic {
    fn from(id: SubscriptionId) -> Self {
        Self::Subscription(id)
    }
}

/// A value broadcast on a [`Topic`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Connect,
    Close { code: u16, reason: String },
    NetworkChanged(String),
    AccountsChanged(Vec<String>),
    Subscription(Result<Value, ProviderError>),
}

/// Listener callback.
pub type Listener = Arc<dyn Fn(&ProviderEvent) + Send + Sync>;

/// Handle returned by [`EventRegistry::add`], used to remove one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
enum Sink {
    Callback(Listener),
    Channel(mpsc::UnboundedSender<ProviderEvent>),
}

impl Sink {
    fn is_live(&self) -> bool {
        match self {
            Self::Callback(_) => true,
            Self::Channel(tx) => !tx.is_closed(),
        }
    }

    fn deliver(&self, event: &ProviderEvent) {
        match self {
            Self::Callback(listener) => listener(event),
            Self::Channel(tx) => {
                let _ = tx.send(event.clone());
            }
        }
    }
}

/// Mapping from topic to its listeners, in registration order.
#[derive(Default)]
pub struct EventRegistry {
    next_id: u64,
    topics: HashMap<Topic, Vec<(ListenerId, Sink)>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener to `topic`.
    pub fn add(&mut self, topic: Topic, listener: Listener) -> ListenerId {
        self.insert(topic, Sink::Callback(listener))
    }

    /// Append a channel listener to `topic`. It is dropped once the
    /// receiving half is gone.
    pub fn add_channel(
        &mut self,
        topic: Topic,
        tx: mpsc::UnboundedSender<ProviderEvent>,
    ) -> ListenerId {
        self.insert(topic, Sink::Channel(tx))
    }

    fn insert(&mut self, topic: Topic, sink: Sink) -> ListenerId {
        self.prune();
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.topics.entry(topic).or_default().push((id, sink));
        id
    }

    /// Drop channel listeners whose receiver has been dropped.
    fn prune(&mut self) {
        self.topics.retain(|_, list| {
            list.retain(|(_, sink)| sink.is_live());
            !list.is_empty()
        });
    }

    /// Remove a single listener. Returns `true` if it was registered.
    pub fn remove(&mut self, topic: &Topic, id: ListenerId) -> bool {
        let Some(list) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }

    /// Drop every listener on `topic`, returning how many were removed.
    pub fn remove_all(&mut self, topic: &Topic) -> usize {
        self.topics.remove(topic).map_or(0, |list| list.len())
    }

    /// Number of listeners on `topic` that can still receive events.
    pub fn listener_count(&self, topic: &Topic) -> usize {
        self.topics.get(topic).map_or(0, |list| {
            list.iter().filter(|(_, sink)| sink.is_live()).count()
        })
    }

    /// Snapshot the listeners of `topic` together with the event to hand them.
    pub fn emission(&self, topic: &Topic, event: ProviderEvent) -> Emission {
        let listeners = self
            .topics
            .get(topic)
            .map(|list| {
                list.iter()
                    .filter(|(_, sink)| sink.is_live())
                    .map(|(_, sink)| sink.clone())
                    .collect()
            })
            .unwrap_or_default();
        Emission { listeners, event }
    }
}

/// An event paired with the listeners it must reach.
#[must_use = "an emission does nothing until delivered"]
pub struct Emission {
    listeners: Vec<Sink>,
    event: ProviderEvent,
}

impl Emission {
    /// Invoke every listener, in registration order.
    pub fn deliver(self) {
        for sink in &self.listeners {
            sink.deliver(&self.event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Listener {
        let log = Arc::clone(log);
        Arc::new(move |event: &ProviderEvent| {
            log.lock().unwrap().push(format!("{tag}:{event:?}"))
        })
    }

    #[test]
    fn delivers_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = EventRegistry::new();
        reg.add(Topic::Connect, recorder(&log, "a"));
        reg.add(Topic::Connect, recorder(&log, "b"));
        reg.add(Topic::Close, recorder(&log, "c"));

        reg.emission(&Topic::Connect, ProviderEvent::Connect).deliver();

        assert_eq!(*log.lock().unwrap(), vec!["a:Connect", "b:Connect"]);
    }

    #[test]
    fn remove_single_and_all() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = EventRegistry::new();
        let topic = Topic::Subscription(SubscriptionId::from("0x1"));
        let first = reg.add(topic.clone(), recorder(&log, "a"));
        reg.add(topic.clone(), recorder(&log, "b"));

        assert!(reg.remove(&topic, first));
        assert!(!reg.remove(&topic, first));
        assert_eq!(reg.listener_count(&topic), 1);
        assert_eq!(reg.remove_all(&topic), 1);
        assert!(reg.emission(&topic, ProviderEvent::Connect).is_empty());
    }

    #[test]
    fn closed_channel_listener_is_pruned() {
        let mut reg = EventRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        reg.add_channel(Topic::Close, tx);
        let (stale_tx, stale_rx) = mpsc::unbounded_channel();
        reg.add_channel(Topic::Connect, stale_tx);
        assert_eq!(reg.listener_count(&Topic::Connect), 1);

        drop(stale_rx);
        assert_eq!(reg.listener_count(&Topic::Connect), 0);
        assert!(reg.emission(&Topic::Connect, ProviderEvent::Connect).is_empty());

        reg.add(Topic::NetworkChanged, Arc::new(|_: &ProviderEvent| {}));
        assert!(!reg.topics.contains_key(&Topic::Connect));

        reg.emission(&Topic::Close, ProviderEvent::Close { code: 1000, reason: String::new() })
            .deliver();
        assert_eq!(
            rx.try_recv().unwrap(),
            ProviderEvent::Close { code: 1000, reason: String::new() }
        );
    }
}
