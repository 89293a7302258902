//! WebSocket implementation of [`Transport`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use chainprovider_core::error::TransportError;
use chainprovider_core::transport::{Transport, TransportEvent};

/// Close code reported when the connection drops without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported for a close frame that carried no status.
pub const NO_STATUS: u16 = 1005;

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WsTransportConfig {
    /// Delay before retrying after the first failed connection attempt.
    pub reconnect_initial: Duration,
    /// Maximum delay between consecutive failed attempts.
    pub reconnect_max: Duration,
}

impl Default for WsTransportConfig {
    fn default() -> Self {
        Self {
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// Command sent from the provider to the background WS task.
enum WsCommand {
    Connect,
    Send(String),
    Close,
}

/// WebSocket transport.
///
/// A background task owns the socket. It connects only when asked to and
/// reports every outcome as a [`TransportEvent`]; reconnect decisions belong
/// to the provider. Consecutive failed attempts are spaced out with
/// exponential backoff.
pub struct WsTransport {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    connected: Arc<AtomicBool>,
}

impl WsTransport {
    /// Start the background task for `url`.
    ///
    /// Must be called within a Tokio runtime. The returned receiver carries
    /// the transport's events; feed it to
    /// [`Provider::spawn_event_loop`](chainprovider_core::Provider::spawn_event_loop).
    pub fn spawn(
        url: impl Into<String>,
        config: WsTransportConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let url = url.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(ws_task(
            url.clone(),
            cmd_rx,
            events_tx,
            Arc::clone(&connected),
            config,
        ));

        (
            Self {
                url,
                cmd_tx,
                connected,
            },
            events_rx,
        )
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

impl Transport for WsTransport {
    fn connect(&self) -> Result<(), TransportError> {
        self.cmd_tx
            .send(WsCommand::Connect)
            .map_err(|_| TransportError::Closed)
    }

    fn send(&self, frame: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.cmd_tx
            .send(WsCommand::Send(frame))
            .map_err(|_| TransportError::WebSocket("WS task closed".into()))
    }

    fn name(&self) -> &str {
        &self.url
    }
}

/// Double `current`, capped at `max`.
pub(crate) fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Close code and reason carried by a server close frame.
pub(crate) fn close_status(frame: Option<CloseFrame<'_>>) -> (u16, String) {
    frame
        .map(|f| (u16::from(f.code), f.reason.into_owned()))
        .unwrap_or_else(|| (NO_STATUS, String::new()))
}

/// Background task that owns the WebSocket connection.
async fn ws_task(
    url: String,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
    config: WsTransportConfig,
) {
    let mut backoff = config.reconnect_initial;
    let mut failures = 0u32;

    loop {
        // Idle until the provider asks for a connection.
        match cmd_rx.recv().await {
            None | Some(WsCommand::Close) => return,
            Some(WsCommand::Send(_)) => {
                tracing::debug!(url = %url, "dropping frame while disconnected");
                continue;
            }
            Some(WsCommand::Connect) => {}
        }

        if failures > 0 {
            tracing::debug!(url = %url, failures, "waiting {backoff:?} before reconnecting");
            time::sleep(backoff).await;
            backoff = next_backoff(backoff, config.reconnect_max);
        }

        tracing::info!(url = %url, "connecting via WebSocket");
        let ws_stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                failures += 1;
                tracing::warn!(error = %e, failures, "WS connect failed");
                let closed = TransportEvent::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: e.to_string(),
                };
                if events_tx.send(closed).is_err() {
                    return;
                }
                continue;
            }
        };

        failures = 0;
        backoff = config.reconnect_initial; // reset on success
        connected.store(true, Ordering::Release);
        if events_tx.send(TransportEvent::Connected).is_err() {
            return;
        }

        let (mut sink, mut stream) = ws_stream.split();

        // Main dispatch loop; yields the close code and reason.
        let (code, reason) = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        None | Some(WsCommand::Close) => {
                            connected.store(false, Ordering::Release);
                            let _ = sink.send(Message::Close(None)).await;
                            return;
                        }
                        Some(WsCommand::Connect) => {
                            tracing::debug!(url = %url, "already connected");
                        }
                        Some(WsCommand::Send(frame)) => {
                            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                                break (ABNORMAL_CLOSURE, e.to_string());
                            }
                        }
                    }
                }
                msg = stream.next() => {
                    match msg {
                        None => break (ABNORMAL_CLOSURE, "stream closed".to_string()),
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WS receive error");
                            break (ABNORMAL_CLOSURE, e.to_string());
                        }
                        Some(Ok(Message::Text(text))) => {
                            let event = TransportEvent::Message(text.as_str().to_owned());
                            if events_tx.send(event).is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => break close_status(frame),
                        _ => {}
                    }
                }
            }
        };

        connected.store(false, Ordering::Release);
        tracing::warn!(url = %url, code, reason = %reason, "WS disconnected");
        if events_tx.send(TransportEvent::Closed { code, reason }).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn backoff_doubles_up_to_max() {
        let max = Duration::from_secs(2);
        let mut delay = Duration::from_millis(500);
        let mut seen = Vec::new();
        for _ in 0..4 {
            delay = next_backoff(delay, max);
            seen.push(delay.as_millis());
        }
        assert_eq!(seen, vec![1000, 2000, 2000, 2000]);
    }

    #[test]
    fn close_frame_maps_to_code_and_reason() {
        let away = CloseFrame {
            code: CloseCode::Away,
            reason: Cow::Borrowed("server restart"),
        };
        assert_eq!(close_status(Some(away)), (1001, "server restart".to_string()));

        let custom = CloseFrame {
            code: CloseCode::from(4000),
            reason: Cow::Borrowed(""),
        };
        assert_eq!(close_status(Some(custom)), (4000, String::new()));

        assert_eq!(close_status(None), (NO_STATUS, String::new()));
    }

    #[tokio::test]
    async fn send_before_connect_is_refused() {
        let (transport, _events) = WsTransport::spawn("ws://127.0.0.1:1", WsTransportConfig::default());
        assert!(!transport.is_connected());
        assert_eq!(
            transport.send("{}".into()),
            Err(TransportError::NotConnected)
        );
        assert_eq!(transport.name(), "ws://127.0.0.1:1");
    }

    #[tokio::test]
    async fn failed_connect_reports_abnormal_close() {
        let (transport, mut events) =
            WsTransport::spawn("ws://127.0.0.1:1", WsTransportConfig::default());
        transport.connect().unwrap();
        match events.recv().await {
            Some(TransportEvent::Closed { code, .. }) => assert_eq!(code, ABNORMAL_CLOSURE),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
