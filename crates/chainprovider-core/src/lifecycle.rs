//! Connection state machine: Initial → Connecting → Connected → Closed → Connecting.
//!
//! Transitions only compute what has to happen; the provider carries out the
//! returned [`LifecycleAction`]s after releasing its state lock.
//!
//! - `start`:      Initial → Connecting, request a connection
//! - `connected`:  Connecting → Connected, broadcast `connect` once per session
//! - `closed`:     any → Closed, broadcast `close`, fail subscriptions, then
//!   reconnect (Closed → Connecting) exactly once for this close
//! - `network`:    broadcast `networkChanged` while Connected, never reconnects

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    Connecting,
    Connected,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Side effect requested by a transition, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Ask the transport to connect.
    Connect,
    EmitConnect,
    EmitClose { code: u16, reason: String },
    /// Fail and forget every active subscription.
    FailSubscriptions { code: u16, reason: String },
    EmitNetworkChanged(String),
}

#[derive(Debug)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
    network_id: Option<String>,
    sessions: u64,
}

impl Default for ConnectionLifecycle {
    fn default() -> Self {
        Self {
            state: ConnectionState::Initial,
            network_id: None,
            sessions: 0,
        }
    }
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Last known network id.
    pub fn network_id(&self) -> Option<&str> {
        self.network_id.as_deref()
    }

    /// Number of sessions that reached `Connected`.
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// Issue the initial connect. Only valid from `Initial`.
    pub fn start(&mut self) -> Vec<LifecycleAction> {
        if self.state != ConnectionState::Initial {
            return Vec::new();
        }
        self.state = ConnectionState::Connecting;
        vec![LifecycleAction::Connect]
    }

    /// Transport acknowledged a connect request.
    pub fn on_connected(&mut self) -> Vec<LifecycleAction> {
        if self.state != ConnectionState::Connecting {
            tracing::debug!(state = %self.state, "ignoring connect acknowledgment");
            return Vec::new();
        }
        self.state = ConnectionState::Connected;
        self.sessions += 1;
        tracing::info!(session = self.sessions, "connected");
        vec![LifecycleAction::EmitConnect]
    }

    /// Transport reported the connection closed.
    pub fn on_closed(&mut self, code: u16, reason: &str) -> Vec<LifecycleAction> {
        tracing::info!(code, reason, from = %self.state, "connection closed, reconnecting");
        self.state = ConnectionState::Closed;
        let actions = vec![
            LifecycleAction::EmitClose {
                code,
                reason: reason.to_string(),
            },
            LifecycleAction::FailSubscriptions {
                code,
                reason: reason.to_string(),
            },
            LifecycleAction::Connect,
        ];
        self.state = ConnectionState::Connecting;
        actions
    }

    /// The node reported (or a query revealed) a network id.
    ///
    /// The id is recorded in any state; only a change while connected is
    /// broadcast.
    pub fn on_network_changed(&mut self, network_id: &str) -> Vec<LifecycleAction> {
        if self.network_id.as_deref() == Some(network_id) {
            return Vec::new();
        }
        self.network_id = Some(network_id.to_string());
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        tracing::info!(network_id, "network changed");
        vec![LifecycleAction::EmitNetworkChanged(network_id.to_string())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_only_once() {
        let mut lc = ConnectionLifecycle::new();
        assert_eq!(lc.start(), vec![LifecycleAction::Connect]);
        assert_eq!(lc.state(), ConnectionState::Connecting);
        assert!(lc.start().is_empty());
    }

    #[test]
    fn connect_broadcast_once_per_session() {
        let mut lc = ConnectionLifecycle::new();
        lc.start();
        assert_eq!(lc.on_connected(), vec![LifecycleAction::EmitConnect]);
        assert!(lc.on_connected().is_empty());
        assert!(lc.is_connected());
        assert_eq!(lc.sessions(), 1);
    }

    #[test]
    fn close_then_reconnect() {
        let mut lc = ConnectionLifecycle::new();
        lc.start();
        lc.on_connected();

        let actions = lc.on_closed(1006, "network lost");
        assert_eq!(
            actions,
            vec![
                LifecycleAction::EmitClose {
                    code: 1006,
                    reason: "network lost".into()
                },
                LifecycleAction::FailSubscriptions {
                    code: 1006,
                    reason: "network lost".into()
                },
                LifecycleAction::Connect,
            ]
        );
        assert_eq!(lc.state(), ConnectionState::Connecting);

        assert_eq!(lc.on_connected(), vec![LifecycleAction::EmitConnect]);
        assert_eq!(lc.sessions(), 2);
    }

    #[test]
    fn each_close_reconnects_exactly_once() {
        let mut lc = ConnectionLifecycle::new();
        lc.start();
        let connects = (0..3)
            .flat_map(|_| lc.on_closed(1001, "going away"))
            .filter(|a| *a == LifecycleAction::Connect)
            .count();
        assert_eq!(connects, 3);
    }

    #[test]
    fn network_change_only_broadcast_while_connected() {
        let mut lc = ConnectionLifecycle::new();
        lc.start();
        assert!(lc.on_network_changed("1").is_empty());
        assert_eq!(lc.network_id(), Some("1"));

        lc.on_connected();
        assert!(lc.on_network_changed("1").is_empty());
        assert_eq!(
            lc.on_network_changed("5"),
            vec![LifecycleAction::EmitNetworkChanged("5".into())]
        );
        assert!(lc.is_connected());
    }
}
