//! chainprovider-ws: WebSocket transport for ChainProvider.
//!
//! # Features
//! - Connects on demand; the provider decides when to reconnect
//! - Exponential backoff between consecutive failed connection attempts
//! - Close code and reason forwarded from the server's close frame
//! - Full support for `eth_subscribe` push notifications

pub mod transport;

use std::sync::Arc;

use tokio::task::JoinHandle;

use chainprovider_core::{Authorizer, Provider, ProviderConfig};

pub use transport::{WsTransport, WsTransportConfig};

/// Build a [`Provider`] over a WebSocket connection to `url`, start its event
/// loop and issue the initial connect.
///
/// Must be called within a Tokio runtime.
pub fn connect(
    url: impl Into<String>,
    ws_config: WsTransportConfig,
    authorizer: Arc<dyn Authorizer>,
    config: ProviderConfig,
) -> (Provider, JoinHandle<()>) {
    let (transport, events) = WsTransport::spawn(url, ws_config);
    let provider = Provider::new(Arc::new(transport), authorizer, config);
    let handle = provider.spawn_event_loop(events);
    provider.connect();
    (provider, handle)
}
