//! Subscription management.
//!
//! Tracks which subscription ids are active and routes `<kind>_subscription`
//! push notifications to the listeners registered under each id. Listeners
//! themselves live in the provider's [`EventRegistry`].

use std::collections::HashMap;

use serde_json::Value;

use crate::correlator::{PendingCall, PendingKind};
use crate::error::ProviderError;
use crate::events::{Emission, EventRegistry, ListenerId, ProviderEvent, Topic};
use crate::provider::Provider;
use crate::request::SubscriptionParams;

/// An opaque subscription id issued by the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription method family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// `eth_subscribe` / `eth_unsubscribe`
    Eth,
    /// `shh_subscribe` / `shh_unsubscribe`
    Shh,
}

impl SubscriptionKind {
    pub fn subscribe_method(self) -> &'static str {
        match self {
            Self::Eth => "eth_subscribe",
            Self::Shh => "shh_subscribe",
        }
    }

    pub fn unsubscribe_method(self) -> &'static str {
        match self {
            Self::Eth => "eth_unsubscribe",
            Self::Shh => "shh_unsubscribe",
        }
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eth => write!(f, "eth"),
            Self::Shh => write!(f, "shh"),
        }
    }
}

/// The set of active subscriptions.
#[derive(Debug, Default)]
pub struct SubscriptionRouter {
    active: HashMap<SubscriptionId, SubscriptionKind>,
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as active.
    pub fn activate(&mut self, id: SubscriptionId, kind: SubscriptionKind) {
        tracing::debug!(subscription = %id, %kind, "subscription active");
        self.active.insert(id, kind);
    }

    /// Remove `id` and release its listeners.
    pub fn deactivate(&mut self, id: &SubscriptionId, events: &mut EventRegistry) -> bool {
        let removed = self.active.remove(id).is_some();
        events.remove_all(&Topic::Subscription(id.clone()));
        removed
    }

    pub fn is_active(&self, id: &SubscriptionId) -> bool {
        self.active.contains_key(id)
    }

    pub fn kind_of(&self, id: &SubscriptionId) -> Option<SubscriptionKind> {
        self.active.get(id).copied()
    }

    /// Active ids, sorted.
    pub fn active_ids(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Returns `true` if there are no active subscriptions.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Prepare delivery of a push notification. Notifications for ids that
    /// aren't active are dropped.
    pub fn route(&self, params: SubscriptionParams, events: &EventRegistry) -> Option<Emission> {
        let id = SubscriptionId(params.subscription);
        if !self.is_active(&id) {
            tracing::debug!(subscription = %id, "dropping notification for inactive subscription");
            return None;
        }
        Some(events.emission(
            &Topic::Subscription(id),
            ProviderEvent::Subscription(Ok(params.result)),
        ))
    }

    /// Deliver `error` once to every listener of every active subscription,
    /// then forget all of them.
    pub fn close_all(&mut self, error: &ProviderError, events: &mut EventRegistry) -> Vec<Emission> {
        let mut emissions = Vec::with_capacity(self.active.len());
        for id in self.active_ids() {
            let topic = Topic::Subscription(id);
            emissions.push(events.emission(&topic, ProviderEvent::Subscription(Err(error.clone()))));
            events.remove_all(&topic);
        }
        self.active.clear();
        emissions
    }
}

fn subscription_id(value: Value) -> Result<SubscriptionId, ProviderError> {
    match value {
        Value::String(s) => Ok(SubscriptionId(s)),
        other => Err(ProviderError::InvalidResponse(format!(
            "expected a subscription id, got {other}"
        ))),
    }
}

fn unsubscribed(value: Value) -> Result<bool, ProviderError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ProviderError::InvalidResponse(format!(
            "expected a boolean, got {other}"
        ))),
    }
}

/// Subscribe/unsubscribe operations, available only on transports that can
/// carry push notifications. Obtained from [`Provider::subscriptions`].
#[derive(Clone)]
pub struct Subscriptions {
    provider: Provider,
}

impl Subscriptions {
    pub(crate) fn new(provider: Provider) -> Self {
        Self { provider }
    }

    /// Issue `<kind>_subscribe` with `[method, ...params]`.
    ///
    /// The id is active by the time the returned future resolves, so a
    /// listener attached right after cannot miss a notification.
    pub fn subscribe(
        &self,
        kind: SubscriptionKind,
        method: &str,
        params: Vec<Value>,
    ) -> PendingCall<SubscriptionId> {
        let params = std::iter::once(Value::String(method.to_string()))
            .chain(params)
            .collect();
        self.provider
            .dispatch(kind.subscribe_method(), params, PendingKind::Subscribe(kind))
            .decode_with(subscription_id)
    }

    /// Issue `<kind>_unsubscribe` with `[id]`.
    ///
    /// Listeners are released only when the node answers `true`.
    pub fn unsubscribe(&self, kind: SubscriptionKind, id: &SubscriptionId) -> PendingCall<bool> {
        self.provider
            .dispatch(
                kind.unsubscribe_method(),
                vec![Value::String(id.0.clone())],
                PendingKind::Unsubscribe(id.clone()),
            )
            .decode_with(unsubscribed)
    }

    /// Register a listener for pushes on `id`.
    pub fn add_listener<F>(&self, id: &SubscriptionId, callback: F) -> ListenerId
    where
        F: Fn(&ProviderEvent) + Send + Sync + 'static,
    {
        self.provider.on(Topic::Subscription(id.clone()), callback)
    }

    /// Drop every listener registered on `id`.
    pub fn remove_all_listeners(&self, id: &SubscriptionId) -> usize {
        self.provider
            .remove_all_listeners(&Topic::Subscription(id.clone()))
    }

    pub fn is_active(&self, id: &SubscriptionId) -> bool {
        self.provider.is_subscription_active(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn collect(events: &mut EventRegistry, id: &str) -> Arc<Mutex<Vec<ProviderEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        events.add(
            Topic::Subscription(SubscriptionId::from(id)),
            Arc::new(move |e: &ProviderEvent| sink.lock().unwrap().push(e.clone())),
        );
        seen
    }

    fn push(id: &str, result: Value) -> SubscriptionParams {
        SubscriptionParams {
            subscription: id.into(),
            result,
        }
    }

    #[test]
    fn route_to_active_subscription() {
        let mut events = EventRegistry::new();
        let mut router = SubscriptionRouter::new();
        let seen = collect(&mut events, "0xdeadbeef");
        router.activate("0xdeadbeef".into(), SubscriptionKind::Eth);

        router
            .route(push("0xdeadbeef", json!({"number": "0x1"})), &events)
            .unwrap()
            .deliver();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ProviderEvent::Subscription(Ok(json!({"number": "0x1"})))]
        );
    }

    #[test]
    fn inactive_subscription_is_dropped() {
        let mut events = EventRegistry::new();
        let router = SubscriptionRouter::new();
        let seen = collect(&mut events, "0x1");
        assert!(router.route(push("0x1", json!(1)), &events).is_none());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn deactivate_releases_listeners() {
        let mut events = EventRegistry::new();
        let mut router = SubscriptionRouter::new();
        let _seen = collect(&mut events, "0x1");
        router.activate("0x1".into(), SubscriptionKind::Shh);
        assert_eq!(router.kind_of(&"0x1".into()), Some(SubscriptionKind::Shh));

        assert!(router.deactivate(&"0x1".into(), &mut events));
        assert!(router.is_empty());
        assert_eq!(events.listener_count(&Topic::Subscription("0x1".into())), 0);
    }

    #[test]
    fn close_all_fails_each_listener_once() {
        let mut events = EventRegistry::new();
        let mut router = SubscriptionRouter::new();
        let a = collect(&mut events, "0xa");
        let b = collect(&mut events, "0xb");
        router.activate("0xa".into(), SubscriptionKind::Eth);
        router.activate("0xb".into(), SubscriptionKind::Eth);

        let err = ProviderError::ConnectionClosed {
            code: 1006,
            reason: "network lost".into(),
        };
        for emission in router.close_all(&err, &mut events) {
            emission.deliver();
        }

        assert!(router.is_empty());
        for seen in [a, b] {
            assert_eq!(
                *seen.lock().unwrap(),
                vec![ProviderEvent::Subscription(Err(err.clone()))]
            );
        }
    }

    #[test]
    fn kind_methods() {
        assert_eq!(SubscriptionKind::Eth.subscribe_method(), "eth_subscribe");
        assert_eq!(SubscriptionKind::Shh.unsubscribe_method(), "shh_unsubscribe");
    }
}
