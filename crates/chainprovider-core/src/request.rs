//! JSON-RPC 2.0 wire types exchanged with the transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC request ID: string, number, or null.
///
/// The provider only ever issues numeric ids, but `send_async` callers may
/// bring their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl RpcId {
    /// The numeric id, if this is one.
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RpcId,
    pub method: String,
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: RpcId::Number(id),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object, carried verbatim from the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

fn default_version() -> String {
    "2.0".into()
}

impl JsonRpcResponse {
    /// Successful response carrying `result`.
    pub fn success(id: RpcId, result: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response carrying `error`.
    pub fn failure(id: RpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Unwrap the result value or return the error object.
    ///
    /// A response without either field resolves to `null`.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// Payload of a `<kind>_subscription` push notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionParams {
    pub subscription: String,
    #[serde(default)]
    pub result: Value,
}

/// Suffix of the method name carried by push notifications.
pub const SUBSCRIPTION_SUFFIX: &str = "_subscription";

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A response to a request this provider issued.
    Response(JsonRpcResponse),
    /// A push notification for an active subscription.
    Notification(SubscriptionParams),
}

impl Inbound {
    /// Classify one JSON value. Returns `None` for anything that is neither a
    /// response nor a subscription notification.
    pub fn from_value(value: Value) -> Option<Self> {
        let is_notification = value
            .get("method")
            .and_then(Value::as_str)
            .is_some_and(|m| m.ends_with(SUBSCRIPTION_SUFFIX));
        if is_notification {
            let params = value.get("params")?.clone();
            return serde_json::from_value(params).ok().map(Self::Notification);
        }
        if value.get("id").is_some() && value.get("method").is_none() {
            return serde_json::from_value(value).ok().map(Self::Response);
        }
        None
    }

    /// Parse a text frame. Batched frames (JSON arrays) yield one entry per
    /// recognised element; unparseable text yields nothing.
    pub fn parse(text: &str) -> Vec<Self> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items.into_iter().filter_map(Self::from_value).collect(),
            Ok(value) => Self::from_value(value).into_iter().collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(0, "net_version", vec![]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            json!({"jsonrpc": "2.0", "id": 0, "method": "net_version", "params": []})
        );
    }

    #[test]
    fn response_into_result_error() {
        let resp: JsonRpcResponse = serde_json::from_value(json!({
            "id": 3,
            "error": {"code": -32000, "message": "execution reverted", "data": "0x08c379a0"}
        }))
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, -32000);
        assert_eq!(err.data, Some(json!("0x08c379a0")));
    }

    #[test]
    fn response_without_result_is_null() {
        let resp: JsonRpcResponse = serde_json::from_value(json!({"id": 1})).unwrap();
        assert_eq!(resp.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn classify_notification() {
        let frames = Inbound::parse(
            r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"sub1","result":{"number":"0x1"}}}"#,
        );
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Inbound::Notification(p) => {
                assert_eq!(p.subscription, "sub1");
                assert_eq!(p.result, json!({"number": "0x1"}));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn classify_batch_and_garbage() {
        let frames = Inbound::parse(r#"[{"id":0,"result":"1"},{"foo":"bar"},{"id":1,"result":true}]"#);
        assert_eq!(frames.len(), 2);
        assert!(Inbound::parse("not json").is_empty());
        assert!(Inbound::parse(r#"{"method":"shh_subscription","params":42}"#).is_empty());
    }
}
