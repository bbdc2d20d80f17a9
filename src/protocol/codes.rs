use serde::{Deserialize, Serialize};

/// `requestStatus.code` values. Codes this client does not know are kept in
/// `Other` so a response never fails to decode because of a newer server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum RequestStatusCode {
    Unknown,
    NoError,
    Success,
    MissingRequestType,
    UnknownRequestType,
    GenericError,
    UnsupportedRequestBatchExecutionType,
    NotReady,
    MissingRequestField,
    MissingRequestData,
    InvalidRequestField,
    InvalidRequestFieldType,
    RequestFieldOutOfRange,
    RequestFieldEmpty,
    TooManyRequestFields,
    OutputRunning,
    OutputNotRunning,
    OutputPaused,
    OutputNotPaused,
    OutputDisabled,
    StudioModeActive,
    StudioModeNotActive,
    ResourceNotFound,
    ResourceAlreadyExists,
    InvalidResourceType,
    NotEnoughResources,
    InvalidResourceState,
    InvalidInputKind,
    ResourceNotConfigurable,
    InvalidFilterKind,
    ResourceCreationFailed,
    ResourceActionFailed,
    RequestProcessingFailed,
    CannotAct,
    Other(i32),
}

const KNOWN_STATUS_CODES: &[(RequestStatusCode, i32)] = &[
    (RequestStatusCode::Unknown, 0),
    (RequestStatusCode::NoError, 10),
    (RequestStatusCode::Success, 100),
    (RequestStatusCode::MissingRequestType, 203),
    (RequestStatusCode::UnknownRequestType, 204),
    (RequestStatusCode::GenericError, 205),
    (RequestStatusCode::UnsupportedRequestBatchExecutionType, 206),
    (RequestStatusCode::NotReady, 207),
    (RequestStatusCode::MissingRequestField, 300),
    (RequestStatusCode::MissingRequestData, 301),
    (RequestStatusCode::InvalidRequestField, 400),
    (RequestStatusCode::InvalidRequestFieldType, 401),
    (RequestStatusCode::RequestFieldOutOfRange, 402),
    (RequestStatusCode::RequestFieldEmpty, 403),
    (RequestStatusCode::TooManyRequestFields, 404),
    (RequestStatusCode::OutputRunning, 500),
    (RequestStatusCode::OutputNotRunning, 501),
    (RequestStatusCode::OutputPaused, 502),
    (RequestStatusCode::OutputNotPaused, 503),
    (RequestStatusCode::OutputDisabled, 504),
    (RequestStatusCode::StudioModeActive, 505),
    (RequestStatusCode::StudioModeNotActive, 506),
    (RequestStatusCode::ResourceNotFound, 600),
    (RequestStatusCode::ResourceAlreadyExists, 601),
    (RequestStatusCode::InvalidResourceType, 602),
    (RequestStatusCode::NotEnoughResources, 603),
    (RequestStatusCode::InvalidResourceState, 604),
    (RequestStatusCode::InvalidInputKind, 605),
    (RequestStatusCode::ResourceNotConfigurable, 606),
    (RequestStatusCode::InvalidFilterKind, 607),
    (RequestStatusCode::ResourceCreationFailed, 700),
    (RequestStatusCode::ResourceActionFailed, 701),
    (RequestStatusCode::RequestProcessingFailed, 702),
    (RequestStatusCode::CannotAct, 703),
];

impl RequestStatusCode {
    pub fn as_i32(self) -> i32 {
        if let Self::Other(code) = self {
            return code;
        }
        KNOWN_STATUS_CODES
            .iter()
            .find(|(known, _)| *known == self)
            .map(|(_, code)| *code)
            .unwrap_or_default()
    }
}

impl From<i32> for RequestStatusCode {
    fn from(code: i32) -> Self {
        KNOWN_STATUS_CODES
            .iter()
            .find(|(_, known)| *known == code)
            .map(|(status, _)| *status)
            .unwrap_or(Self::Other(code))
    }
}

impl From<RequestStatusCode> for i32 {
    fn from(code: RequestStatusCode) -> Self {
        code.as_i32()
    }
}

/// WebSocket close codes the server uses to explain why it hung up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    UnknownReason,
    MessageDecodeError,
    MissingDataField,
    InvalidDataFieldType,
    InvalidDataFieldValue,
    UnknownOpCode,
    NotIdentified,
    AlreadyIdentified,
    AuthenticationFailed,
    UnsupportedRpcVersion,
    SessionInvalidated,
    UnsupportedFeature,
}

impl CloseCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        let known = match code {
            4000 => Self::UnknownReason,
            4002 => Self::MessageDecodeError,
            4003 => Self::MissingDataField,
            4004 => Self::InvalidDataFieldType,
            4005 => Self::InvalidDataFieldValue,
            4006 => Self::UnknownOpCode,
            4007 => Self::NotIdentified,
            4008 => Self::AlreadyIdentified,
            4009 => Self::AuthenticationFailed,
            4010 => Self::UnsupportedRpcVersion,
            4011 => Self::SessionInvalidated,
            4012 => Self::UnsupportedFeature,
            _ => return None,
        };
        Some(known)
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::UnknownReason => 4000,
            Self::MessageDecodeError => 4002,
            Self::MissingDataField => 4003,
            Self::InvalidDataFieldType => 4004,
            Self::InvalidDataFieldValue => 4005,
            Self::UnknownOpCode => 4006,
            Self::NotIdentified => 4007,
            Self::AlreadyIdentified => 4008,
            Self::AuthenticationFailed => 4009,
            Self::UnsupportedRpcVersion => 4010,
            Self::SessionInvalidated => 4011,
            Self::UnsupportedFeature => 4012,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::UnknownReason => "unknown reason",
            Self::MessageDecodeError => "server could not decode a message",
            Self::MissingDataField => "message was missing a required field",
            Self::InvalidDataFieldType => "message field had the wrong type",
            Self::InvalidDataFieldValue => "message field had an invalid value",
            Self::UnknownOpCode => "unknown opcode",
            Self::NotIdentified => "message sent before identifying",
            Self::AlreadyIdentified => "identify sent twice",
            Self::AuthenticationFailed => "authentication failed",
            Self::UnsupportedRpcVersion => "unsupported rpc version",
            Self::SessionInvalidated => "session invalidated by the server",
            Self::UnsupportedFeature => "feature not supported",
        }
    }
}
