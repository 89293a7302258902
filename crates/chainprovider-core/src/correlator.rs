//! Request/response correlation over a shared, unordered channel.
//!
//! Every outbound request gets the next id from a per-provider counter and a
//! pending entry keyed by that id. Inbound responses are matched by id, never
//! by order. Ids are not reused, even after their entry is gone.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::ProviderError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::subscriptions::{SubscriptionId, SubscriptionKind};

/// Outcome delivered to a waiting caller.
pub type CallResult = Result<Value, ProviderError>;

/// What the inbound path has to do besides settling the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
    /// Plain call.
    Call,
    /// A subscribe call; a string result activates a subscription.
    Subscribe(SubscriptionKind),
    /// An unsubscribe call; a `true` result tears the subscription down.
    Unsubscribe(SubscriptionId),
}

struct PendingRequest {
    method: String,
    kind: PendingKind,
    tx: oneshot::Sender<CallResult>,
}

/// A pending entry removed from the table, together with its outcome.
///
/// The caller is only notified once [`Settled::complete`] runs, so the
/// provider can update the subscription table first.
pub struct Settled {
    pub id: u64,
    pub method: String,
    pub kind: PendingKind,
    pub outcome: CallResult,
    tx: oneshot::Sender<CallResult>,
}

impl Settled {
    /// Hand the outcome to the caller. A caller that dropped its
    /// [`PendingCall`] is ignored.
    pub fn complete(self) {
        let _ = self.tx.send(self.outcome);
    }
}

/// Owned table of in-flight requests.
#[derive(Default)]
pub struct RequestCorrelator {
    next_id: u64,
    pending: HashMap<u64, PendingRequest>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id, build the request record and store the pending entry.
    pub fn register(
        &mut self,
        method: &str,
        params: Vec<Value>,
        kind: PendingKind,
    ) -> (JsonRpcRequest, oneshot::Receiver<CallResult>) {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                kind,
                tx,
            },
        );
        (JsonRpcRequest::new(id, method, params), rx)
    }

    /// Match a response against the table.
    ///
    /// Returns `None` for ids that are unknown or already settled.
    pub fn settle(&mut self, response: JsonRpcResponse) -> Option<Settled> {
        let Some(id) = response.id.as_number() else {
            tracing::debug!(id = %response.id, "dropping response with non-numeric id");
            return None;
        };
        let Some(entry) = self.pending.remove(&id) else {
            tracing::debug!(id, "dropping response for unknown request");
            return None;
        };
        let outcome = response.into_result().map_err(ProviderError::from);
        Some(Settled {
            id,
            method: entry.method,
            kind: entry.kind,
            outcome,
            tx: entry.tx,
        })
    }

    /// Fail a single entry, e.g. when the transport refused its frame.
    pub fn abandon(&mut self, id: u64, error: ProviderError) -> bool {
        match self.pending.remove(&id) {
            Some(entry) => {
                let _ = entry.tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail every pending entry with a clone of `error`.
    pub fn fail_all(&mut self, error: &ProviderError) -> usize {
        let count = self.pending.len();
        for (_, entry) in self.pending.drain() {
            let _ = entry.tx.send(Err(error.clone()));
        }
        count
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

enum CallState {
    Waiting(oneshot::Receiver<CallResult>),
    Failed(Option<ProviderError>),
}

/// Future returned by every provider call. Settles exactly once.
///
/// The request has already been handed to the transport by the time this
/// value exists; awaiting it only waits for the outcome.
#[must_use = "dropping a PendingCall discards the outcome of the request"]
pub struct PendingCall<T = Value> {
    id: Option<u64>,
    state: CallState,
    decode: fn(Value) -> Result<T, ProviderError>,
}

impl PendingCall<Value> {
    pub(crate) fn waiting(id: u64, rx: oneshot::Receiver<CallResult>) -> Self {
        Self {
            id: Some(id),
            state: CallState::Waiting(rx),
            decode: Ok,
        }
    }

    /// A call rejected before it reached the transport.
    pub(crate) fn failed(error: ProviderError) -> Self {
        Self {
            id: None,
            state: CallState::Failed(Some(error)),
            decode: Ok,
        }
    }

    pub(crate) fn decode_with<U>(
        self,
        decode: fn(Value) -> Result<U, ProviderError>,
    ) -> PendingCall<U> {
        PendingCall {
            id: self.id,
            state: self.state,
            decode,
        }
    }
}

impl<T> PendingCall<T> {
    /// The request id, or `None` if the call never reached the transport.
    pub fn id(&self) -> Option<u64> {
        self.id
    }
}

impl<T> Future for PendingCall<T> {
    type Output = Result<T, ProviderError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            CallState::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(ProviderError::Dropped)))
            }
            CallState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(Ok(value))) => Poll::Ready((this.decode)(value)),
                Poll::Ready(Ok(Err(error))) => Poll::Ready(Err(error)),
                Poll::Ready(Err(_)) => Poll::Ready(Err(ProviderError::Dropped)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{JsonRpcError, RpcId};
    use serde_json::json;

    #[test]
    fn ids_are_strictly_increasing() {
        let mut c = RequestCorrelator::new();
        let ids: Vec<u64> = (0..5)
            .map(|_| {
                let (req, _rx) = c.register("eth_blockNumber", vec![], PendingKind::Call);
                req.id.as_number().unwrap()
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn freed_ids_are_not_reused() {
        let mut c = RequestCorrelator::new();
        let (first, _rx) = c.register("a", vec![], PendingKind::Call);
        assert!(c
            .settle(JsonRpcResponse::success(first.id, json!(1)))
            .is_some());
        let (second, _rx) = c.register("b", vec![], PendingKind::Call);
        assert_eq!(second.id, RpcId::Number(1));
    }

    #[tokio::test]
    async fn out_of_order_settlement() {
        let mut c = RequestCorrelator::new();
        let (a, rx_a) = c.register("a", vec![], PendingKind::Call);
        let (b, rx_b) = c.register("b", vec![], PendingKind::Call);

        c.settle(JsonRpcResponse::success(b.id, json!("second")))
            .unwrap()
            .complete();
        c.settle(JsonRpcResponse::failure(
            a.id,
            JsonRpcError {
                code: -32000,
                message: "boom".into(),
                data: None,
            },
        ))
        .unwrap()
        .complete();

        assert_eq!(rx_b.await.unwrap().unwrap(), json!("second"));
        let err = rx_a.await.unwrap().unwrap_err();
        assert_eq!(err.code(), Some(-32000));
        assert_eq!(c.pending_len(), 0);
    }

    #[test]
    fn duplicate_and_unknown_ids_are_dropped() {
        let mut c = RequestCorrelator::new();
        let (req, _rx) = c.register("a", vec![], PendingKind::Call);
        assert!(c.settle(JsonRpcResponse::success(req.id.clone(), json!(1))).is_some());
        assert!(c.settle(JsonRpcResponse::success(req.id, json!(2))).is_none());
        assert!(c.settle(JsonRpcResponse::success(RpcId::Number(99), json!(3))).is_none());
        assert!(c
            .settle(JsonRpcResponse::success(RpcId::String("x".into()), json!(4)))
            .is_none());
    }

    #[tokio::test]
    async fn fail_all_drains_the_table() {
        let mut c = RequestCorrelator::new();
        let (_, rx) = c.register("a", vec![], PendingKind::Call);
        let (_, _rx2) = c.register("b", vec![], PendingKind::Call);
        let err = ProviderError::ConnectionClosed {
            code: 1006,
            reason: "gone".into(),
        };
        assert_eq!(c.fail_all(&err), 2);
        assert_eq!(rx.await.unwrap().unwrap_err(), err);
        assert_eq!(c.pending_len(), 0);
    }

    #[tokio::test]
    async fn rejected_call_settles_once() {
        let call = PendingCall::failed(ProviderError::InvalidRequest("empty method".into()));
        assert_eq!(call.id(), None);
        assert!(matches!(call.await, Err(ProviderError::InvalidRequest(_))));
    }
}
