// src/network/message.rs
// Factory RPC wire format: one JSON object per line in each direction.

use crate::error::{ErrorKind, FactoryError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation names accepted in `FactoryRequest::op`
pub mod ops {
    pub const CREATE_SERVER: &str = "create_server";
    pub const DESTROY_SERVER: &str = "destroy_server";
    pub const GET_OUTCOMES: &str = "get_outcomes";
    pub const DESCRIBE_SERVER: &str = "describe_server";
    pub const LIST_SERVERS: &str = "list_servers";
    pub const PING: &str = "ping";
    pub const SHUTDOWN: &str = "shutdown";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryRequest {
    pub id: u64,
    pub op: String,
    #[serde(default)]
    pub params: Value,
}

impl FactoryRequest {
    pub fn new(id: u64, op: &str, params: Value) -> Self {
        Self {
            id,
            op: op.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&FactoryError> for WireError {
    fn from(e: &FactoryError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Exactly one of `ok` / `err` is set. A `null` result is carried as a missing `ok`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<WireError>,
}

impl FactoryResponse {
    pub fn ok(id: u64, value: Value) -> Self {
        Self {
            id,
            ok: Some(value),
            err: None,
        }
    }

    pub fn err(id: u64, error: &FactoryError) -> Self {
        Self {
            id,
            ok: None,
            err: Some(WireError::from(error)),
        }
    }
}

/// `handle` parameter shared by the per-endpoint operations
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HandleParams {
    pub handle: crate::endpoint::EndpointHandle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointHandle;

    #[test]
    fn request_params_default_to_null() {
        let req: FactoryRequest = serde_json::from_str(r#"{"id":3,"op":"ping"}"#).unwrap();
        assert_eq!(req.id, 3);
        assert_eq!(req.op, ops::PING);
        assert!(req.params.is_null());
    }

    #[test]
    fn error_response_shape() {
        let resp = FactoryResponse::err(9, &FactoryError::UnknownHandle(EndpointHandle(4)));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["id"], 9);
        assert_eq!(json["err"]["kind"], "unknown_handle");
        assert!(json.get("ok").is_none());
    }
}
