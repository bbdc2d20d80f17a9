use crate::error::{EngineError, EngineResult};
use crate::protocol::{
    EventEnvelope, HelloInfo, IdentifiedInfo, IdentifyInfo, OpCode, ReidentifyInfo,
    RequestBatchEnvelope, RequestBatchResponse, RequestEnvelope, RequestResponse,
    JSON_SUBPROTOCOL, MSGPACK_SUBPROTOCOL,
};
use crate::transport::Frame;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Outbound wire encoding. Inbound frames are decoded by frame kind, so the
/// engine reads either encoding whatever this is set to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireEncoding {
    #[default]
    Json,
    #[serde(rename = "msgpack")]
    MsgPack,
}

impl WireEncoding {
    pub fn subprotocol(self) -> &'static str {
        match self {
            WireEncoding::Json => JSON_SUBPROTOCOL,
            WireEncoding::MsgPack => MSGPACK_SUBPROTOCOL,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WireEncoding::Json => "json",
            WireEncoding::MsgPack => "msgpack",
        }
    }
}

impl FromStr for WireEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(WireEncoding::Json),
            "msgpack" | "messagepack" => Ok(WireEncoding::MsgPack),
            other => Err(format!("unknown wire encoding: {other}")),
        }
    }
}

impl fmt::Display for WireEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outer `{op, d}` envelope with its payload still untyped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

/// A decoded envelope: the payload shape is fixed by the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum OpData {
    Hello(HelloInfo),
    Identify(IdentifyInfo),
    Identified(IdentifiedInfo),
    Reidentify(ReidentifyInfo),
    Event(EventEnvelope),
    Request(RequestEnvelope),
    RequestResponse(RequestResponse),
    RequestBatch(RequestBatchEnvelope),
    RequestBatchResponse(RequestBatchResponse),
}

impl OpData {
    pub fn op_code(&self) -> OpCode {
        match self {
            OpData::Hello(_) => OpCode::Hello,
            OpData::Identify(_) => OpCode::Identify,
            OpData::Identified(_) => OpCode::Identified,
            OpData::Reidentify(_) => OpCode::Reidentify,
            OpData::Event(_) => OpCode::Event,
            OpData::Request(_) => OpCode::Request,
            OpData::RequestResponse(_) => OpCode::RequestResponse,
            OpData::RequestBatch(_) => OpCode::RequestBatch,
            OpData::RequestBatchResponse(_) => OpCode::RequestBatchResponse,
        }
    }

    pub fn to_raw(&self) -> EngineResult<RawEnvelope> {
        let d = match self {
            OpData::Hello(v) => serde_json::to_value(v),
            OpData::Identify(v) => serde_json::to_value(v),
            OpData::Identified(v) => serde_json::to_value(v),
            OpData::Reidentify(v) => serde_json::to_value(v),
            OpData::Event(v) => serde_json::to_value(v),
            OpData::Request(v) => serde_json::to_value(v),
            OpData::RequestResponse(v) => serde_json::to_value(v),
            OpData::RequestBatch(v) => serde_json::to_value(v),
            OpData::RequestBatchResponse(v) => serde_json::to_value(v),
        }
        .map_err(|err| {
            EngineError::BuildingRequestFailed(format!("{} payload: {err}", self.op_code()))
        })?;
        Ok(RawEnvelope {
            op: self.op_code().as_u8(),
            d,
        })
    }

    /// Maps a raw envelope onto the shape its opcode demands.
    pub fn from_raw(raw: &RawEnvelope) -> EngineResult<Self> {
        let op = OpCode::try_from(raw.op).map_err(EngineError::DecodeFailed)?;
        let data = match op {
            OpCode::Hello => OpData::Hello(decode_op_payload(op, &raw.d)?),
            OpCode::Identify => OpData::Identify(decode_op_payload(op, &raw.d)?),
            OpCode::Identified => OpData::Identified(decode_op_payload(op, &raw.d)?),
            OpCode::Reidentify => OpData::Reidentify(decode_op_payload(op, &raw.d)?),
            OpCode::Event => OpData::Event(decode_op_payload(op, &raw.d)?),
            OpCode::Request => OpData::Request(decode_op_payload(op, &raw.d)?),
            OpCode::RequestResponse => OpData::RequestResponse(decode_op_payload(op, &raw.d)?),
            OpCode::RequestBatch => OpData::RequestBatch(decode_op_payload(op, &raw.d)?),
            OpCode::RequestBatchResponse => {
                OpData::RequestBatchResponse(decode_op_payload(op, &raw.d)?)
            }
        };
        Ok(data)
    }
}

fn decode_op_payload<T: DeserializeOwned>(op: OpCode, d: &Value) -> EngineResult<T> {
    T::deserialize(d).map_err(|err| EngineError::DecodeFailed(format!("{op} payload: {err}")))
}

/// Decodes a caller-level payload (request data, response data, event data).
pub fn decode_payload<T: DeserializeOwned>(value: &Value) -> EngineResult<T> {
    T::deserialize(value).map_err(|err| EngineError::DecodeFailed(err.to_string()))
}

pub fn encode(data: &OpData, encoding: WireEncoding) -> EngineResult<Frame> {
    let raw = data.to_raw()?;
    encode_raw(&raw, encoding)
}

pub fn encode_raw(raw: &RawEnvelope, encoding: WireEncoding) -> EngineResult<Frame> {
    match encoding {
        WireEncoding::Json => serde_json::to_string(raw)
            .map(Frame::Text)
            .map_err(|err| EngineError::BuildingRequestFailed(format!("encode failed: {err}"))),
        WireEncoding::MsgPack => rmp_serde::to_vec_named(raw)
            .map(Frame::Binary)
            .map_err(|err| EngineError::BuildingRequestFailed(format!("encode failed: {err}"))),
    }
}

/// Text frames carry JSON, binary frames carry MessagePack.
pub fn decode_frame(frame: &Frame) -> EngineResult<RawEnvelope> {
    match frame {
        Frame::Text(text) => serde_json::from_str(text)
            .map_err(|err| EngineError::DecodeFailed(format!("json frame: {err}"))),
        Frame::Binary(bytes) => rmp_serde::from_slice(bytes)
            .map_err(|err| EngineError::DecodeFailed(format!("msgpack frame: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EventSubscription, RequestStatus};
    use serde_json::json;

    fn scene_changed_event() -> OpData {
        OpData::Event(EventEnvelope {
            event_type: "CurrentProgramSceneChanged".to_string(),
            event_intent: EventSubscription::SCENES,
            event_data: Some(json!({ "sceneName": "Live", "sceneUuid": "u-1" })),
        })
    }

    #[test]
    fn json_and_msgpack_frames_decode_to_the_same_envelope() {
        let event = scene_changed_event();
        let from_json = decode_frame(&encode(&event, WireEncoding::Json).unwrap()).unwrap();
        let from_msgpack = decode_frame(&encode(&event, WireEncoding::MsgPack).unwrap()).unwrap();

        assert_eq!(from_json, from_msgpack);
        assert_eq!(OpData::from_raw(&from_msgpack).unwrap(), event);
    }

    #[test]
    fn json_frame_uses_op_and_d_keys() {
        let frame = encode(
            &OpData::Identified(IdentifiedInfo {
                negotiated_rpc_version: 1,
            }),
            WireEncoding::Json,
        )
        .unwrap();
        let Frame::Text(text) = frame else {
            panic!("json encoding must produce a text frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({ "op": 2, "d": { "negotiatedRpcVersion": 1 } }));
    }

    #[test]
    fn payload_that_does_not_fit_its_opcode_is_rejected() {
        // A RequestResponse body labelled as Hello.
        let raw = RawEnvelope {
            op: OpCode::Hello.as_u8(),
            d: json!({
                "requestType": "GetVersion",
                "requestId": "r1",
                "requestStatus": { "result": true, "code": 100 }
            }),
        };
        let err = OpData::from_raw(&raw).unwrap_err();
        assert!(matches!(err, EngineError::DecodeFailed(ref msg) if msg.contains("Hello")));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let raw = RawEnvelope { op: 4, d: json!({}) };
        assert!(matches!(
            OpData::from_raw(&raw),
            Err(EngineError::DecodeFailed(_))
        ));
    }

    #[test]
    fn garbage_frames_fail_to_decode() {
        assert!(decode_frame(&Frame::Text("not json".to_string())).is_err());
        assert!(decode_frame(&Frame::Binary(vec![0xc1])).is_err());
    }

    #[test]
    fn request_response_survives_msgpack() {
        let response = OpData::RequestResponse(RequestResponse {
            request_type: "GetStats".to_string(),
            request_id: "r-9".to_string(),
            request_status: RequestStatus::success(),
            response_data: Some(json!({ "activeFps": 60.0, "renderTotalFrames": 1200 })),
        });
        let raw = decode_frame(&encode(&response, WireEncoding::MsgPack).unwrap()).unwrap();
        assert_eq!(OpData::from_raw(&raw).unwrap(), response);
    }

    #[test]
    fn encoding_parses_from_config_strings() {
        assert_eq!("JSON".parse::<WireEncoding>().unwrap(), WireEncoding::Json);
        assert_eq!("msgpack".parse::<WireEncoding>().unwrap(), WireEncoding::MsgPack);
        assert!("xml".parse::<WireEncoding>().is_err());
        assert_eq!(WireEncoding::MsgPack.subprotocol(), "obswebsocket.msgpack");
    }
}
