//! Error types for the transport and the provider.

use serde_json::Value;
use thiserror::Error;

use crate::request::JsonRpcError;

/// User denied enabling the full provider.
pub const USER_DENIED_ENABLE: i64 = 4001;
/// User denied account creation.
pub const USER_DENIED_ACCOUNT_CREATION: i64 = 4010;
/// The requested method needs an account that is not authorized.
pub const UNAUTHORIZED: i64 = 4100;
/// JSON-RPC internal error, used when a local error has no code of its own.
pub const INTERNAL_ERROR: i64 = -32603;

/// Errors raised by a [`Transport`](crate::transport::Transport) while
/// handing a frame over. None of these carry an RPC id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport has no live connection.
    #[error("transport not connected")]
    NotConnected,

    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The transport has been shut down for good.
    #[error("transport closed")]
    Closed,
}

/// Errors surfaced by provider operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// Framing or network failure; no RPC id to correlate.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Error object reported by the node, carried verbatim.
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// Raised locally by the authorization gate.
    #[error("{message} (code {code})")]
    Authorization { code: i64, message: String },

    /// Delivered to subscription listeners when the connection drops.
    #[error("connection closed ({code}): {reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// The call was rejected before reaching the transport.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The node answered with something the provider can't use.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider went away before the call settled.
    #[error("provider dropped before the request settled")]
    Dropped,
}

impl ProviderError {
    pub fn user_denied_enable() -> Self {
        Self::Authorization {
            code: USER_DENIED_ENABLE,
            message: "User denied enabling the full provider".into(),
        }
    }

    pub fn user_denied_account_creation() -> Self {
        Self::Authorization {
            code: USER_DENIED_ACCOUNT_CREATION,
            message: "User denied account creation".into(),
        }
    }

    pub fn unauthorized(method: &str) -> Self {
        Self::Authorization {
            code: UNAUTHORIZED,
            message: format!("The requested account has not been authorized for {method}"),
        }
    }

    /// Numeric code, when one is known.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } | Self::Authorization { code, .. } => Some(*code),
            Self::ConnectionClosed { code, .. } => Some(i64::from(*code)),
            _ => None,
        }
    }

    /// Extra data attached by the node, if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Rpc { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    /// Returns `true` for errors raised by the authorization gate.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }

    /// Render as a JSON-RPC error object, for callers that expect one.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            Self::Rpc {
                code,
                message,
                data,
            } => JsonRpcError {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            other => JsonRpcError {
                code: other.code().unwrap_or(INTERNAL_ERROR),
                message: other.to_string(),
                data: None,
            },
        }
    }
}

impl From<JsonRpcError> for ProviderError {
    fn from(err: JsonRpcError) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rpc_error_keeps_fields() {
        let err = ProviderError::from(JsonRpcError {
            code: -32601,
            message: "method not found".into(),
            data: Some(json!({"method": "foo"})),
        });
        assert_eq!(err.code(), Some(-32601));
        assert_eq!(err.data(), Some(&json!({"method": "foo"})));
        assert_eq!(err.to_string(), "RPC error -32601: method not found");
    }

    #[test]
    fn authorization_codes() {
        assert_eq!(ProviderError::user_denied_enable().code(), Some(4001));
        assert_eq!(ProviderError::user_denied_account_creation().code(), Some(4010));
        let err = ProviderError::unauthorized("eth_sendTransaction");
        assert!(err.is_authorization());
        assert_eq!(err.code(), Some(4100));
    }

    #[test]
    fn local_errors_render_as_internal() {
        let rendered = ProviderError::Dropped.to_rpc_error();
        assert_eq!(rendered.code, INTERNAL_ERROR);
        assert!(!rendered.message.is_empty());
    }

    #[test]
    fn closed_carries_close_code() {
        let err = ProviderError::ConnectionClosed {
            code: 1006,
            reason: "network lost".into(),
        };
        assert_eq!(err.code(), Some(1006));
        assert!(err.to_string().contains("network lost"));
    }
}
