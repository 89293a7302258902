//! chainprovider-core: the provider core of ChainProvider.
//!
//! # Overview
//!
//! A [`Provider`] multiplexes calls, subscriptions and lifecycle events over
//! one opaque [`Transport`] to a blockchain node. The core crate defines:
//!
//! - [`Transport`] / [`TransportEvent`]: the message channel and its signals
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`]: wire types
//! - [`correlator`]: id allocation and request/response matching
//! - [`subscriptions`]: push notification routing
//! - [`lifecycle`]: connect / close / reconnect state machine
//! - [`auth`]: authorization gate and the [`Authorizer`] consent trait
//! - [`events`]: topic-keyed listener registry
//! - [`ProviderError`]: structured error type

pub mod auth;
pub mod config;
pub mod correlator;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod provider;
pub mod request;
pub mod subscriptions;
pub mod transport;

pub use auth::{AccountPolicy, Authorizer, ConsentDecision, DenyAll};
pub use config::ProviderConfig;
pub use correlator::PendingCall;
pub use error::{ProviderError, TransportError};
pub use events::{ListenerId, ProviderEvent, Topic};
pub use lifecycle::ConnectionState;
pub use provider::Provider;
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use subscriptions::{SubscriptionId, SubscriptionKind, Subscriptions};
pub use transport::{Transport, TransportEvent};
