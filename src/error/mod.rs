use crate::protocol::{CloseCode, RequestStatus};

/// Every failure the engine can surface to a caller.
///
/// The enum is `Clone` because one terminal error (a transport disconnect,
/// say) is fanned out to every subscriber of every live stream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("no connection data configured")]
    NoConnectionData,
    #[error("already connected or connecting")]
    AlreadyConnected,
    #[error("disconnected ({}): {reason}", close_code_label(.code))]
    Disconnected { code: Option<u16>, reason: String },
    #[error("server requires authentication but no password is configured")]
    MissingPasswordWhereRequired,
    #[error("{request_type} failed with code {}{}", .status.code.as_i32(), comment_suffix(.status))]
    RequestFailed {
        request_type: String,
        status: RequestStatus,
    },
    #[error("failed to build request: {0}")]
    BuildingRequestFailed(String),
    #[error("event type conversion failed: {0}")]
    EventTypeConversionFailed(String),
    #[error("timed out waiting to connect")]
    TimedOutWaitingToConnect,
    #[error("decode failed: {0}")]
    DecodeFailed(String),
}

impl EngineError {
    pub fn disconnected(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Disconnected {
            code,
            reason: reason.into(),
        }
    }

    pub fn not_connected() -> Self {
        Self::disconnected(None, "not connected")
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

fn close_code_label(code: &Option<u16>) -> String {
    match code {
        Some(code) => match CloseCode::from_u16(*code) {
            Some(known) => format!("{code} {}", known.description()),
            None => code.to_string(),
        },
        None => "no close code".to_string(),
    }
}

fn comment_suffix(status: &RequestStatus) -> String {
    match status.comment.as_deref() {
        Some(comment) if !comment.is_empty() => format!(": {comment}"),
        _ => String::new(),
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestStatusCode;

    #[test]
    fn disconnected_message_names_known_close_codes() {
        let err = EngineError::disconnected(Some(4009), "bad password");
        let msg = err.to_string();
        assert!(msg.contains("4009"));
        assert!(msg.contains("authentication failed"));
        assert!(msg.contains("bad password"));

        let err = EngineError::not_connected();
        assert!(err.to_string().contains("no close code"));
    }

    #[test]
    fn request_failed_message_includes_comment() {
        let err = EngineError::RequestFailed {
            request_type: "SetCurrentProgramScene".to_string(),
            status: RequestStatus {
                result: false,
                code: RequestStatusCode::ResourceNotFound,
                comment: Some("No source was found".to_string()),
            },
        };
        assert_eq!(
            err.to_string(),
            "SetCurrentProgramScene failed with code 600: No source was found"
        );
    }
}
