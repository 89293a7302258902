//! The `Transport` trait: the opaque message channel under the provider.

use crate::error::TransportError;

/// Signals a transport feeds back into the provider.
///
/// Transports push these into the `mpsc` channel handed to
/// [`Provider::spawn_event_loop`](crate::Provider::spawn_event_loop), or
/// the embedding code calls [`Provider::handle_event`](crate::Provider::handle_event)
/// directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connect request was acknowledged.
    Connected,
    /// One inbound text frame.
    Message(String),
    /// The connection dropped.
    Closed { code: u16, reason: String },
    /// The node switched networks.
    NetworkChanged(String),
    /// The user switched the exposed accounts outside of `enable`.
    AccountsChanged(Vec<String>),
}

/// A bidirectional message channel to a node.
///
/// Both methods only hand work over and must not block; outcomes come back
/// asynchronously as [`TransportEvent`]s.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and is stored as `Arc<dyn Transport>`.
pub trait Transport: Send + Sync + 'static {
    /// Ask the transport to (re)establish its connection.
    fn connect(&self) -> Result<(), TransportError>;

    /// Hand one serialized JSON-RPC frame to the transport.
    fn send(&self, frame: String) -> Result<(), TransportError>;

    /// Whether the transport can carry push notifications.
    fn supports_subscriptions(&self) -> bool {
        true
    }

    /// The transport's identifier (URL or name).
    fn name(&self) -> &str;
}
