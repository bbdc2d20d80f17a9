use crate::cache::{pipeline, Cache, CacheKey, Step, Subscription};
use crate::codec::OpData;
use crate::demux;
use crate::error::{EngineError, EngineResult};
use crate::protocol::{OpCode, RequestEnvelope, RequestResponse};
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;

pub(crate) fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn envelope(request_type: &str, request_id: &str, data: Option<Value>) -> OpData {
    OpData::Request(RequestEnvelope {
        request_type: request_type.to_string(),
        request_id: request_id.to_string(),
        request_data: data,
    })
}

/// Registers interest in the response to `request_id`. Must be called
/// before the request is sent.
pub(crate) fn response_stream(
    cache: &mut Cache,
    request_id: &str,
) -> EngineResult<Subscription<RequestResponse>> {
    let id = request_id.to_string();
    cache.get_or_create(CacheKey::Response(id.clone()), move |cache, hub| {
        let upstream = demux::operation(cache, OpCode::RequestResponse)?;
        Ok(pipeline(upstream, hub, move |data: Arc<OpData>| match &*data {
            OpData::RequestResponse(response) if response.request_id == id => {
                Step::EmitAndComplete(response.clone())
            }
            _ => Step::Skip,
        }))
    })
}

/// Resolves exactly once: the first response, or the error that ended the
/// stream.
pub(crate) async fn await_response<T: Clone + Send + 'static>(
    stream: &mut Subscription<T>,
) -> EngineResult<T> {
    match stream.next().await {
        Some(item) => item,
        None => Err(EngineError::disconnected(
            None,
            "response stream ended without a response",
        )),
    }
}

/// Splits a response into its data, or the failure the server reported.
pub(crate) fn into_result(response: RequestResponse) -> EngineResult<Option<Value>> {
    if response.request_status.is_success() {
        Ok(response.response_data)
    } else {
        Err(EngineError::RequestFailed {
            request_type: response.request_type,
            status: response.request_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RequestStatus, RequestStatusCode};
    use serde_json::json;

    fn response(status: RequestStatus) -> RequestResponse {
        RequestResponse {
            request_type: "GetSceneList".to_string(),
            request_id: "r1".to_string(),
            request_status: status,
            response_data: Some(json!({ "scenes": [] })),
        }
    }

    #[test]
    fn successful_response_yields_its_data() {
        let data = into_result(response(RequestStatus::success())).unwrap();
        assert_eq!(data, Some(json!({ "scenes": [] })));
    }

    #[test]
    fn failed_response_carries_the_status() {
        let status = RequestStatus::failure(RequestStatusCode::NotReady, "not ready");
        let err = into_result(response(status.clone())).unwrap_err();
        assert_eq!(
            err,
            EngineError::RequestFailed {
                request_type: "GetSceneList".to_string(),
                status,
            }
        );
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(new_request_id(), new_request_id());
    }
}
