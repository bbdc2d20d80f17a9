//! obs-websocket v5 message shapes.
//!
//! Field names follow the wire (camelCase). Payloads that belong to the
//! external request/event catalog stay opaque as [`serde_json::Value`].

mod codes;
mod subscription;

pub use codes::{CloseCode, RequestStatusCode};
pub use subscription::EventSubscription;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Highest RPC version this client speaks.
pub const RPC_VERSION: u32 = 1;

pub const JSON_SUBPROTOCOL: &str = "obswebsocket.json";
pub const MSGPACK_SUBPROTOCOL: &str = "obswebsocket.msgpack";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum OpCode {
    Hello,
    Identify,
    Identified,
    Reidentify,
    Event,
    Request,
    RequestResponse,
    RequestBatch,
    RequestBatchResponse,
}

impl OpCode {
    pub const ALL: [OpCode; 9] = [
        OpCode::Hello,
        OpCode::Identify,
        OpCode::Identified,
        OpCode::Reidentify,
        OpCode::Event,
        OpCode::Request,
        OpCode::RequestResponse,
        OpCode::RequestBatch,
        OpCode::RequestBatchResponse,
    ];

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Hello => 0,
            OpCode::Identify => 1,
            OpCode::Identified => 2,
            OpCode::Reidentify => 3,
            OpCode::Event => 5,
            OpCode::Request => 6,
            OpCode::RequestResponse => 7,
            OpCode::RequestBatch => 8,
            OpCode::RequestBatchResponse => 9,
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op.as_u8()
    }
}

impl TryFrom<u8> for OpCode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        OpCode::ALL
            .into_iter()
            .find(|op| op.as_u8() == value)
            .ok_or_else(|| format!("unknown opcode {value}"))
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    pub challenge: String,
    pub salt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloInfo {
    pub obs_web_socket_version: String,
    pub rpc_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<Authentication>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyInfo {
    pub rpc_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_subscriptions: Option<EventSubscription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifiedInfo {
    pub negotiated_rpc_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReidentifyInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_subscriptions: Option<EventSubscription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_type: String,
    pub event_intent: EventSubscription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub request_type: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: RequestStatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl RequestStatus {
    pub fn success() -> Self {
        Self {
            result: true,
            code: RequestStatusCode::Success,
            comment: None,
        }
    }

    pub fn failure(code: RequestStatusCode, comment: impl Into<String>) -> Self {
        Self {
            result: false,
            code,
            comment: Some(comment.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
}

/// Server-side scheduling of a batch. Forwarded as-is, never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum ExecutionType {
    None,
    SerialRealtime,
    SerialFrame,
    Parallel,
}

impl From<ExecutionType> for i8 {
    fn from(value: ExecutionType) -> Self {
        match value {
            ExecutionType::None => -1,
            ExecutionType::SerialRealtime => 0,
            ExecutionType::SerialFrame => 1,
            ExecutionType::Parallel => 2,
        }
    }
}

impl TryFrom<i8> for ExecutionType {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(ExecutionType::None),
            0 => Ok(ExecutionType::SerialRealtime),
            1 => Ok(ExecutionType::SerialFrame),
            2 => Ok(ExecutionType::Parallel),
            other => Err(format!("unknown batch execution type {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequestEntry {
    pub request_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBatchEnvelope {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_on_failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_type: Option<ExecutionType>,
    pub requests: Vec<BatchRequestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponseEntry {
    pub request_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub request_status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBatchResponse {
    pub request_id: String,
    pub results: Vec<BatchResponseEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn opcode_values_match_the_wire() {
        assert_eq!(u8::from(OpCode::Hello), 0);
        assert_eq!(u8::from(OpCode::Event), 5);
        assert_eq!(u8::from(OpCode::RequestBatchResponse), 9);
        assert_eq!(OpCode::try_from(7).unwrap(), OpCode::RequestResponse);
        assert!(OpCode::try_from(4).is_err());
    }

    #[test]
    fn hello_parses_with_and_without_authentication() {
        let hello: HelloInfo = serde_json::from_value(json!({
            "obsWebSocketVersion": "5.1.0",
            "rpcVersion": 1,
            "authentication": { "challenge": "c", "salt": "s" }
        }))
        .unwrap();
        assert_eq!(hello.authentication.unwrap().salt, "s");

        let hello: HelloInfo = serde_json::from_value(json!({
            "obsWebSocketVersion": "5.1.0",
            "rpcVersion": 1
        }))
        .unwrap();
        assert!(hello.authentication.is_none());
    }

    #[test]
    fn identify_omits_absent_fields() {
        let identify = IdentifyInfo {
            rpc_version: 1,
            authentication: None,
            event_subscriptions: Some(EventSubscription::ALL),
        };
        let value = serde_json::to_value(&identify).unwrap();
        assert_eq!(value, json!({ "rpcVersion": 1, "eventSubscriptions": 2047 }));
    }

    #[test]
    fn batch_execution_type_uses_signed_wire_values() {
        let batch = RequestBatchEnvelope {
            request_id: "b1".to_string(),
            halt_on_failure: Some(true),
            execution_type: Some(ExecutionType::None),
            requests: vec![BatchRequestEntry {
                request_type: "GetVersion".to_string(),
                request_id: None,
                request_data: None,
            }],
        };
        let value = serde_json::to_value(&batch).unwrap();
        assert_eq!(value["executionType"], json!(-1));
        assert_eq!(value["requests"][0], json!({ "requestType": "GetVersion" }));
    }

    #[test]
    fn unknown_status_codes_survive_a_round_trip() {
        let status: RequestStatus =
            serde_json::from_value(json!({ "result": false, "code": 9999 })).unwrap();
        assert_eq!(status.code, RequestStatusCode::Other(9999));
        assert_eq!(serde_json::to_value(&status).unwrap()["code"], json!(9999));
    }
}
