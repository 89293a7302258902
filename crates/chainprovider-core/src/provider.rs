//! The `Provider`: the call/subscribe/event surface handed to a dapp.
//!
//! A provider owns one transport, one authorizer and a single state table
//! (pending requests, active subscriptions, connection state, authorized
//! accounts, listeners). State is only touched from the public operations and
//! from [`Provider::handle_event`]. Listeners and the transport are always
//! called with the state lock released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::{AuthorizationGate, Authorizer, ConsentDecision};
use crate::config::ProviderConfig;
use crate::correlator::{PendingCall, PendingKind, RequestCorrelator};
use crate::error::ProviderError;
use crate::events::{Emission, EventRegistry, ListenerId, ProviderEvent, Topic};
use crate::lifecycle::{ConnectionLifecycle, ConnectionState, LifecycleAction};
use crate::request::{Inbound, JsonRpcResponse, RpcId, SubscriptionParams};
use crate::subscriptions::{SubscriptionId, SubscriptionRouter, Subscriptions};
use crate::transport::{Transport, TransportEvent};

struct State {
    correlator: RequestCorrelator,
    router: SubscriptionRouter,
    lifecycle: ConnectionLifecycle,
    auth: AuthorizationGate,
    events: EventRegistry,
}

struct Inner {
    transport: Arc<dyn Transport>,
    authorizer: Arc<dyn Authorizer>,
    fail_pending_on_close: bool,
    state: Mutex<State>,
}

/// Client-side request multiplexer over a [`Transport`].
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct Provider {
    inner: Arc<Inner>,
}

impl Provider {
    /// Build a provider. Nothing is sent until [`connect`](Self::connect).
    pub fn new(
        transport: Arc<dyn Transport>,
        authorizer: Arc<dyn Authorizer>,
        config: ProviderConfig,
    ) -> Self {
        let state = State {
            correlator: RequestCorrelator::new(),
            router: SubscriptionRouter::new(),
            lifecycle: ConnectionLifecycle::new(),
            auth: AuthorizationGate::new(config.account_policy, config.authorized_accounts),
            events: EventRegistry::new(),
        };
        Self {
            inner: Arc::new(Inner {
                transport,
                authorizer,
                fail_pending_on_close: config.fail_pending_on_close,
                state: Mutex::new(state),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Connection ─────────────────────────────────────────────────────────

    /// Issue the initial connect request. Calling it again is a no-op.
    pub fn connect(&self) {
        let actions = self.state().lifecycle.start();
        self.run(actions);
    }

    /// Drive the provider from a transport's event channel until it closes.
    ///
    /// The loop holds only a weak reference, so dropping the last `Provider`
    /// handle drops the transport, which in turn closes the channel.
    pub fn spawn_event_loop(
        &self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                Provider { inner }.handle_event(event);
            }
            tracing::debug!("provider event loop finished");
        })
    }

    /// Process one transport event.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                let actions = self.state().lifecycle.on_connected();
                self.run(actions);
            }
            TransportEvent::Message(text) => {
                let frames = Inbound::parse(&text);
                if frames.is_empty() {
                    tracing::debug!(len = text.len(), "dropping unrecognised frame");
                }
                for frame in frames {
                    match frame {
                        Inbound::Response(response) => self.settle(response),
                        Inbound::Notification(params) => self.notify(params),
                    }
                }
            }
            TransportEvent::Closed { code, reason } => {
                let actions = self.state().lifecycle.on_closed(code, &reason);
                self.run(actions);
            }
            TransportEvent::NetworkChanged(network_id) => {
                let actions = self.state().lifecycle.on_network_changed(&network_id);
                self.run(actions);
            }
            TransportEvent::AccountsChanged(accounts) => self.set_accounts(accounts),
        }
    }

    fn settle(&self, response: JsonRpcResponse) {
        let mut state = self.state();
        let Some(settled) = state.correlator.settle(response) else {
            return;
        };
        let State { router, events, .. } = &mut *state;
        match (&settled.kind, &settled.outcome) {
            (PendingKind::Subscribe(kind), Ok(Value::String(id))) => {
                router.activate(SubscriptionId(id.clone()), *kind);
            }
            (PendingKind::Unsubscribe(id), Ok(Value::Bool(true))) => {
                router.deactivate(id, events);
            }
            _ => {}
        }
        tracing::trace!(id = settled.id, method = %settled.method, ok = settled.outcome.is_ok(), "request settled");
        settled.complete();
    }

    fn notify(&self, params: SubscriptionParams) {
        let emission = {
            let state = self.state();
            state.router.route(params, &state.events)
        };
        if let Some(emission) = emission {
            emission.deliver();
        }
    }

    fn run(&self, actions: Vec<LifecycleAction>) {
        for action in actions {
            match action {
                LifecycleAction::Connect => {
                    if let Err(e) = self.inner.transport.connect() {
                        tracing::warn!(
                            error = %e,
                            transport = self.inner.transport.name(),
                            "connect request failed"
                        );
                    }
                }
                LifecycleAction::EmitConnect => self.emit(Topic::Connect, ProviderEvent::Connect),
                LifecycleAction::EmitClose { code, reason } => {
                    self.emit(Topic::Close, ProviderEvent::Close { code, reason })
                }
                LifecycleAction::FailSubscriptions { code, reason } => {
                    let error = ProviderError::ConnectionClosed { code, reason };
                    let emissions = {
                        let mut state = self.state();
                        let State {
                            router,
                            events,
                            correlator,
                            ..
                        } = &mut *state;
                        if self.inner.fail_pending_on_close {
                            let failed = correlator.fail_all(&error);
                            tracing::debug!(failed, "failed pending requests on close");
                        }
                        router.close_all(&error, events)
                    };
                    for emission in emissions {
                        emission.deliver();
                    }
                }
                LifecycleAction::EmitNetworkChanged(network_id) => self.emit(
                    Topic::NetworkChanged,
                    ProviderEvent::NetworkChanged(network_id),
                ),
            }
        }
    }

    fn emit(&self, topic: Topic, event: ProviderEvent) {
        let emission = self.state().events.emission(&topic, event);
        emission.deliver();
    }

    pub fn is_connected(&self) -> bool {
        self.state().lifecycle.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state().lifecycle.state()
    }

    /// Last known network id.
    pub fn network_id(&self) -> Option<String> {
        self.state().lifecycle.network_id().map(str::to_string)
    }

    /// Query `net_version`, record the answer and broadcast `networkChanged`
    /// if it differs from the last known id while connected.
    pub async fn refresh_network_id(&self) -> Result<String, ProviderError> {
        let network_id = match self.send("net_version", vec![]).await? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            other => {
                return Err(ProviderError::InvalidResponse(format!(
                    "expected a network id, got {other}"
                )))
            }
        };
        let actions = self.state().lifecycle.on_network_changed(&network_id);
        self.run(actions);
        Ok(network_id)
    }

    // ── Requests ───────────────────────────────────────────────────────────

    /// Send `method` with `params` and return a future for its result.
    ///
    /// The frame is handed to the transport before this returns. Validation
    /// and authorization failures settle the future without touching the
    /// transport.
    pub fn send(&self, method: &str, params: Vec<Value>) -> PendingCall {
        self.dispatch(method, params, PendingKind::Call)
    }

    /// Like [`send`](Self::send), for untyped params. Anything other than an
    /// array or `null` is rejected.
    pub fn send_value(&self, method: &str, params: Value) -> PendingCall {
        match params {
            Value::Array(params) => self.send(method, params),
            Value::Null => self.send(method, Vec::new()),
            other => PendingCall::failed(ProviderError::InvalidRequest(format!(
                "params must be an array, got {other}"
            ))),
        }
    }

    pub(crate) fn dispatch(&self, method: &str, params: Vec<Value>, kind: PendingKind) -> PendingCall {
        if method.trim().is_empty() {
            return PendingCall::failed(ProviderError::InvalidRequest(
                "method must be a non-empty string".into(),
            ));
        }

        let (request, rx) = {
            let mut state = self.state();
            if !state.auth.is_authorized(method) {
                tracing::debug!(method, "rejecting call that needs an authorized account");
                return PendingCall::failed(ProviderError::unauthorized(method));
            }
            state.correlator.register(method, params, kind)
        };
        let id = request.id.as_number().unwrap_or_default();

        let sent = serde_json::to_string(&request)
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))
            .and_then(|frame| self.inner.transport.send(frame).map_err(ProviderError::from));
        if let Err(error) = sent {
            tracing::warn!(id, method, error = %error, "failed to hand request to transport");
            self.state().correlator.abandon(id, error);
        }

        PendingCall::waiting(id, rx)
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.state().correlator.pending_len()
    }

    /// Legacy callback-style entry point.
    ///
    /// `payload` is a JSON-RPC request object or an array of them. A single
    /// request reports `Ok(response)` or the error; a batch always reports an
    /// array of response objects, failed entries carrying an `error` member.
    /// Response ids echo the caller's ids. Must be called within a Tokio
    /// runtime.
    pub fn send_async<F>(&self, payload: Value, callback: F)
    where
        F: FnOnce(Result<Value, ProviderError>) + Send + 'static,
    {
        match payload {
            Value::Array(items) => {
                let calls: Vec<_> = items.into_iter().map(|item| self.legacy_call(item)).collect();
                tokio::spawn(async move {
                    let mut responses = Vec::with_capacity(calls.len());
                    for (id, call) in calls {
                        let response = match call.await {
                            Ok(result) => JsonRpcResponse::success(id, result),
                            Err(error) => JsonRpcResponse::failure(id, error.to_rpc_error()),
                        };
                        responses.push(response);
                    }
                    callback(serde_json::to_value(responses).map_err(|e| {
                        ProviderError::InvalidResponse(e.to_string())
                    }));
                });
            }
            Value::Object(_) => {
                let (id, call) = self.legacy_call(payload);
                tokio::spawn(async move {
                    let outcome = call.await.and_then(|result| {
                        serde_json::to_value(JsonRpcResponse::success(id, result))
                            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
                    });
                    callback(outcome);
                });
            }
            other => callback(Err(ProviderError::InvalidRequest(format!(
                "payload must be an object or an array, got {other}"
            )))),
        }
    }

    fn legacy_call(&self, payload: Value) -> (RpcId, PendingCall) {
        let id = payload
            .get("id")
            .cloned()
            .and_then(|id| serde_json::from_value(id).ok())
            .unwrap_or(RpcId::Null);
        let Some(method) = payload.get("method").and_then(Value::as_str) else {
            let error = ProviderError::InvalidRequest("payload has no method".into());
            return (id, PendingCall::failed(error));
        };
        let params = payload.get("params").cloned().unwrap_or(Value::Null);
        (id, self.send_value(method, params))
    }

    // ── Subscriptions ──────────────────────────────────────────────────────

    /// Subscribe/unsubscribe operations, or `None` when the transport can't
    /// carry push notifications.
    pub fn subscriptions(&self) -> Option<Subscriptions> {
        self.inner
            .transport
            .supports_subscriptions()
            .then(|| Subscriptions::new(self.clone()))
    }

    pub fn is_subscription_active(&self, id: &SubscriptionId) -> bool {
        self.state().router.is_active(id)
    }

    /// Ids of all active subscriptions, sorted.
    pub fn active_subscriptions(&self) -> Vec<SubscriptionId> {
        self.state().router.active_ids()
    }

    // ── Authorization ──────────────────────────────────────────────────────

    /// Ask the user to expose their accounts.
    ///
    /// Resolves `true` straight away when accounts are already remembered.
    pub async fn enable(&self) -> Result<bool, ProviderError> {
        let remembered = self.state().auth.is_remembered();
        if remembered {
            return Ok(true);
        }

        match self.inner.authorizer.request_consent().await {
            ConsentDecision::Approved(accounts) => {
                let emission = self.accounts_emission(|auth| auth.approve(accounts));
                if let Some(emission) = emission {
                    emission.deliver();
                }
                Ok(true)
            }
            ConsentDecision::Denied => {
                tracing::info!("user denied enabling the provider");
                Err(ProviderError::user_denied_enable())
            }
            ConsentDecision::AccountCreationDenied => {
                tracing::info!("user denied account creation");
                Err(ProviderError::user_denied_account_creation())
            }
        }
    }

    /// Record an account switch observed outside of `enable`.
    pub fn set_accounts(&self, accounts: Vec<String>) {
        if let Some(emission) = self.accounts_emission(|auth| auth.set_accounts(accounts)) {
            emission.deliver();
        }
    }

    fn accounts_emission(
        &self,
        update: impl FnOnce(&mut AuthorizationGate) -> Option<Vec<String>>,
    ) -> Option<Emission> {
        let mut state = self.state();
        let changed = update(&mut state.auth)?;
        Some(
            state
                .events
                .emission(&Topic::AccountsChanged, ProviderEvent::AccountsChanged(changed)),
        )
    }

    /// Whether a call to `method` would pass the authorization gate.
    pub fn is_authorized(&self, method: &str) -> bool {
        self.state().auth.is_authorized(method)
    }

    pub fn is_enabled(&self) -> bool {
        self.state().auth.is_enabled()
    }

    /// Authorized accounts, in authorization order.
    pub fn accounts(&self) -> Vec<String> {
        self.state().auth.accounts().to_vec()
    }

    // ── Events ─────────────────────────────────────────────────────────────

    /// Register `callback` on `topic`.
    pub fn on<F>(&self, topic: Topic, callback: F) -> ListenerId
    where
        F: Fn(&ProviderEvent) + Send + Sync + 'static,
    {
        self.state().events.add(topic, Arc::new(callback))
    }

    /// Remove one listener.
    pub fn off(&self, topic: &Topic, id: ListenerId) -> bool {
        self.state().events.remove(topic, id)
    }

    pub fn remove_all_listeners(&self, topic: &Topic) -> usize {
        self.state().events.remove_all(topic)
    }

    pub fn listener_count(&self, topic: &Topic) -> usize {
        self.state().events.listener_count(topic)
    }

    /// Receive the events of `topic` through a channel instead of a callback.
    ///
    /// Dropping the receiver unregisters it.
    pub fn listen(&self, topic: Topic) -> mpsc::UnboundedReceiver<ProviderEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().events.add_channel(topic, tx);
        rx
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("transport", &self.inner.transport.name())
            .finish_non_exhaustive()
    }
}
