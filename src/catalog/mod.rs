//! Request and event payload contract.
//!
//! The engine treats payloads as opaque JSON trees. A type opts into typed
//! access by implementing [`Request`] or [`Event`]; the [`PayloadRegistry`]
//! adds name-based decoding for places where the Rust type is only known at
//! runtime (merged event streams).

pub mod events;
pub mod requests;

use crate::codec::decode_payload;
use crate::error::{EngineError, EngineResult};
use crate::protocol::EventSubscription;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait Request: Serialize + Send + Sync + 'static {
    const TYPE: &'static str;
    type Response: DeserializeOwned + Send + Sync + 'static;
}

pub trait Event: DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}

pub type ErasedPayload = Arc<dyn Any + Send + Sync>;

type DecodeFn = fn(Option<&Value>) -> EngineResult<ErasedPayload>;

/// Encodes request data. Unit-like requests encode to nothing.
pub fn encode_data<T: Serialize>(value: &T) -> EngineResult<Option<Value>> {
    match serde_json::to_value(value) {
        Ok(Value::Null) => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(err) => Err(EngineError::BuildingRequestFailed(err.to_string())),
    }
}

/// Decodes response or event data. Absent data is tried as `null`, then as
/// `{}`, so unit and all-optional payload types decode.
pub fn decode_data<T: DeserializeOwned>(data: Option<&Value>) -> EngineResult<T> {
    match data {
        Some(value) if !value.is_null() => decode_payload(value),
        _ => T::deserialize(&Value::Null)
            .or_else(|_| T::deserialize(&Value::Object(Map::new())))
            .map_err(|err| EngineError::DecodeFailed(err.to_string())),
    }
}

fn decode_erased<T: DeserializeOwned + Send + Sync + 'static>(
    data: Option<&Value>,
) -> EngineResult<ErasedPayload> {
    Ok(Arc::new(decode_data::<T>(data)?))
}

fn decode_raw(data: Option<&Value>) -> EngineResult<ErasedPayload> {
    Ok(Arc::new(data.cloned().unwrap_or(Value::Null)))
}

/// Event type name to decoder.
#[derive(Clone, Default)]
pub struct PayloadRegistry {
    events: HashMap<String, DecodeFn>,
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every event type this crate ships.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        events::register_builtin(&mut registry);
        registry
    }

    pub fn register_event<E: Event>(&mut self) -> &mut Self {
        self.events
            .insert(E::TYPE.to_string(), decode_erased::<E> as DecodeFn);
        self
    }

    /// Registers an event whose payload is kept as a raw JSON value.
    pub fn register_raw_event(&mut self, event_type: impl Into<String>) -> &mut Self {
        self.events.insert(event_type.into(), decode_raw as DecodeFn);
        self
    }

    pub fn has_event(&self, event_type: &str) -> bool {
        self.events.contains_key(event_type)
    }

    pub fn event_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.events.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn decode_event(&self, event_type: &str, data: Option<&Value>) -> EngineResult<ErasedPayload> {
        let decode = self.events.get(event_type).ok_or_else(|| {
            EngineError::EventTypeConversionFailed(format!("no decoder registered for {event_type}"))
        })?;
        decode(data)
    }
}

impl fmt::Debug for PayloadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadRegistry")
            .field("events", &self.event_types())
            .finish()
    }
}

/// An event decoded through the registry, with its Rust type erased.
#[derive(Clone)]
pub struct DecodedEvent {
    pub event_type: String,
    pub intent: EventSubscription,
    pub data: Option<Value>,
    payload: ErasedPayload,
}

impl DecodedEvent {
    pub(crate) fn new(
        event_type: String,
        intent: EventSubscription,
        data: Option<Value>,
        payload: ErasedPayload,
    ) -> Self {
        Self {
            event_type,
            intent,
            data,
            payload,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub fn is<E: Event>(&self) -> bool {
        self.event_type == E::TYPE && self.payload.is::<E>()
    }
}

impl fmt::Debug for DecodedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedEvent")
            .field("event_type", &self.event_type)
            .field("intent", &self.intent)
            .field("data", &self.data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::events::{CurrentProgramSceneChanged, ExitStarted};
    use super::requests::{GetVersion, SetCurrentProgramScene};
    use super::*;
    use serde_json::json;

    #[test]
    fn unit_requests_encode_to_no_data() {
        assert_eq!(encode_data(&GetVersion).unwrap(), None);
        let data = encode_data(&SetCurrentProgramScene {
            scene_name: "Live".to_string(),
        })
        .unwrap();
        assert_eq!(data, Some(json!({ "sceneName": "Live" })));
    }

    #[test]
    fn absent_data_decodes_into_unit_and_empty_types() {
        decode_data::<()>(None).unwrap();
        decode_data::<ExitStarted>(None).unwrap();
        assert!(decode_data::<CurrentProgramSceneChanged>(None).is_err());
    }

    #[test]
    fn registry_decodes_by_name() {
        let registry = PayloadRegistry::with_builtin();
        let payload = registry
            .decode_event(
                CurrentProgramSceneChanged::TYPE,
                Some(&json!({ "sceneName": "Intro", "sceneUuid": "u-1" })),
            )
            .unwrap();
        let event = payload.downcast_ref::<CurrentProgramSceneChanged>().unwrap();
        assert_eq!(event.scene_name, "Intro");
    }

    #[test]
    fn unregistered_event_is_a_conversion_failure() {
        let registry = PayloadRegistry::new();
        let err = registry.decode_event("InputCreated", None).unwrap_err();
        assert!(matches!(err, EngineError::EventTypeConversionFailed(_)));
    }

    #[test]
    fn raw_events_keep_their_json() {
        let mut registry = PayloadRegistry::new();
        registry.register_raw_event("VendorEvent");
        let payload = registry
            .decode_event("VendorEvent", Some(&json!({ "vendorName": "x" })))
            .unwrap();
        assert_eq!(
            payload.downcast_ref::<Value>(),
            Some(&json!({ "vendorName": "x" }))
        );
    }
}
