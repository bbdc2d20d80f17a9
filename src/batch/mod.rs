use crate::cache::{pipeline, Cache, CacheKey, Step, Subscription};
use crate::catalog::{self, ErasedPayload, Request};
use crate::codec::OpData;
use crate::demux;
use crate::error::{EngineError, EngineResult};
use crate::protocol::{
    BatchRequestEntry, BatchResponseEntry, ExecutionType, OpCode, RequestBatchEnvelope,
    RequestBatchResponse,
};
use crate::request::new_request_id;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type ResponseDecoder = fn(Option<&Value>) -> EngineResult<ErasedPayload>;

fn decode_typed<R: Request>(data: Option<&Value>) -> EngineResult<ErasedPayload> {
    Ok(Arc::new(catalog::decode_data::<R::Response>(data)?))
}

fn decode_value(data: Option<&Value>) -> EngineResult<ErasedPayload> {
    Ok(Arc::new(data.cloned().unwrap_or(Value::Null)))
}

/// One item of a batch, with the decoder for its response.
#[derive(Clone)]
pub struct BatchRequest {
    request_type: String,
    request_id: Option<String>,
    request_data: Option<Value>,
    decode: ResponseDecoder,
}

impl BatchRequest {
    pub fn new<R: Request>(request: &R) -> EngineResult<Self> {
        Ok(Self {
            request_type: R::TYPE.to_string(),
            request_id: None,
            request_data: catalog::encode_data(request)?,
            decode: decode_typed::<R>,
        })
    }

    /// An untyped item; its response data is kept as a JSON value.
    pub fn raw(request_type: impl Into<String>, request_data: Option<Value>) -> Self {
        Self {
            request_type: request_type.into(),
            request_id: None,
            request_data,
            decode: decode_value,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    /// Key this item's outcome is filed under.
    pub fn result_key(&self) -> &str {
        self.request_id.as_deref().unwrap_or(&self.request_type)
    }
}

impl fmt::Debug for BatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRequest")
            .field("request_type", &self.request_type)
            .field("request_id", &self.request_id)
            .field("request_data", &self.request_data)
            .finish()
    }
}

#[derive(Clone)]
pub enum BatchOutcome {
    Success(ErasedPayload),
    /// The server reported a failure for this item.
    Failure(BatchResponseEntry),
    /// The item succeeded but its data did not fit the expected type.
    Undecodable {
        response: BatchResponseEntry,
        error: EngineError,
    },
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchOutcome::Success(_))
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            BatchOutcome::Success(payload) => payload.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOutcome::Success(_) => f.write_str("Success(..)"),
            BatchOutcome::Failure(response) => f.debug_tuple("Failure").field(response).finish(),
            BatchOutcome::Undecodable { response, error } => f
                .debug_struct("Undecodable")
                .field("response", response)
                .field("error", error)
                .finish(),
        }
    }
}

/// Outcomes keyed by item id, or by request type for items sent without one.
#[derive(Debug, Clone, Default)]
pub struct BatchResults {
    outcomes: HashMap<String, BatchOutcome>,
}

impl BatchResults {
    pub fn get(&self, key: &str) -> Option<&BatchOutcome> {
        self.outcomes.get(key)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.outcomes.keys().map(String::as_str)
    }

    /// Typed view of one outcome, turning server failures into
    /// `RequestFailed`.
    pub fn typed<R: Request>(&self, key: &str) -> EngineResult<&R::Response> {
        match self.outcomes.get(key) {
            Some(BatchOutcome::Success(payload)) => {
                payload.downcast_ref::<R::Response>().ok_or_else(|| {
                    EngineError::DecodeFailed(format!("{key} does not hold a {} response", R::TYPE))
                })
            }
            Some(BatchOutcome::Failure(response)) => Err(EngineError::RequestFailed {
                request_type: response.request_type.clone(),
                status: response.request_status.clone(),
            }),
            Some(BatchOutcome::Undecodable { error, .. }) => Err(error.clone()),
            None => Err(EngineError::DecodeFailed(format!("no batch result for {key}"))),
        }
    }
}

impl IntoIterator for BatchResults {
    type Item = (String, BatchOutcome);
    type IntoIter = std::collections::hash_map::IntoIter<String, BatchOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}

/// A batch ready to send: every item has a wire id, and the map back to the
/// caller's keys and decoders is kept alongside.
pub(crate) struct PreparedBatch {
    pub(crate) envelope: RequestBatchEnvelope,
    items: HashMap<String, (String, ResponseDecoder)>,
}

pub(crate) fn prepare(
    execution_type: Option<ExecutionType>,
    halt_on_failure: Option<bool>,
    requests: Vec<BatchRequest>,
) -> PreparedBatch {
    let mut items = HashMap::with_capacity(requests.len());
    let mut entries = Vec::with_capacity(requests.len());
    for request in requests {
        let key = request.result_key().to_string();
        let wire_id = request.request_id.clone().unwrap_or_else(new_request_id);
        items.insert(wire_id.clone(), (key, request.decode));
        entries.push(BatchRequestEntry {
            request_type: request.request_type,
            request_id: Some(wire_id),
            request_data: request.request_data,
        });
    }
    PreparedBatch {
        envelope: RequestBatchEnvelope {
            request_id: new_request_id(),
            halt_on_failure,
            execution_type,
            requests: entries,
        },
        items,
    }
}

impl PreparedBatch {
    pub(crate) fn batch_id(&self) -> &str {
        &self.envelope.request_id
    }

    /// Files every per-item response. Nothing in the response is dropped.
    pub(crate) fn collect(&self, response: RequestBatchResponse) -> BatchResults {
        let mut outcomes = HashMap::with_capacity(response.results.len());
        for entry in response.results {
            let known = entry
                .request_id
                .as_deref()
                .and_then(|id| self.items.get(id));
            let (key, decode) = match known {
                Some((key, decode)) => (key.clone(), Some(*decode)),
                None => (entry.request_type.clone(), self.decoder_for_type(&entry.request_type)),
            };
            let outcome = if !entry.request_status.is_success() {
                BatchOutcome::Failure(entry)
            } else {
                let decode = decode.unwrap_or(decode_value);
                match decode(entry.response_data.as_ref()) {
                    Ok(payload) => BatchOutcome::Success(payload),
                    Err(error) => BatchOutcome::Undecodable {
                        response: entry,
                        error,
                    },
                }
            };
            if outcomes.insert(key.clone(), outcome).is_some() {
                tracing::warn!(key = %key, "batch results share a key; keeping the last");
            }
        }
        BatchResults { outcomes }
    }

    fn decoder_for_type(&self, request_type: &str) -> Option<ResponseDecoder> {
        self.envelope
            .requests
            .iter()
            .find(|entry| entry.request_type == request_type)
            .and_then(|entry| entry.request_id.as_deref())
            .and_then(|id| self.items.get(id))
            .map(|(_, decode)| *decode)
    }
}

/// Registers interest in the response to batch `batch_id`.
pub(crate) fn response_stream(
    cache: &mut Cache,
    batch_id: &str,
) -> EngineResult<Subscription<RequestBatchResponse>> {
    let id = batch_id.to_string();
    cache.get_or_create(CacheKey::BatchResponse(id.clone()), move |cache, hub| {
        let upstream = demux::operation(cache, OpCode::RequestBatchResponse)?;
        Ok(pipeline(upstream, hub, move |data: Arc<OpData>| match &*data {
            OpData::RequestBatchResponse(response) if response.request_id == id => {
                Step::EmitAndComplete(response.clone())
            }
            _ => Step::Skip,
        }))
    })
}
