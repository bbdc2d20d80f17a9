use crate::cache::{pipeline, Cache, CacheKey, Step, Subscription};
use crate::catalog::{self, DecodedEvent, Event, PayloadRegistry};
use crate::codec::OpData;
use crate::demux;
use crate::error::{EngineError, EngineResult};
use crate::protocol::OpCode;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Shared stream of one event type decoded as `E`. Events that fail to
/// decode are logged and skipped.
pub(crate) fn event_stream<E: Event>(cache: &mut Cache) -> EngineResult<Subscription<Arc<E>>> {
    cache.get_or_create(CacheKey::Event(E::TYPE.to_string()), |cache, hub| {
        let upstream = demux::operation(cache, OpCode::Event)?;
        Ok(pipeline(upstream, hub, |data: Arc<OpData>| {
            let OpData::Event(event) = &*data else {
                return Step::Skip;
            };
            if event.event_type != E::TYPE {
                return Step::Skip;
            }
            match catalog::decode_data::<E>(event.event_data.as_ref()) {
                Ok(decoded) => Step::Emit(Arc::new(decoded)),
                Err(err) => {
                    tracing::warn!(event_type = E::TYPE, error = %err, "skipping undecodable event");
                    Step::Skip
                }
            }
        }))
    })
}

/// Shared stream of several event types merged in arrival order, decoded
/// through `registry`. Every type must be registered.
pub(crate) fn event_group_stream(
    cache: &mut Cache,
    registry: &Arc<PayloadRegistry>,
    event_types: &[&str],
) -> EngineResult<Subscription<Arc<DecodedEvent>>> {
    if event_types.is_empty() {
        return Err(EngineError::EventTypeConversionFailed(
            "no event types requested".to_string(),
        ));
    }
    if let Some(missing) = event_types.iter().find(|name| !registry.has_event(name)) {
        return Err(EngineError::EventTypeConversionFailed(format!(
            "no decoder registered for {missing}"
        )));
    }

    let wanted: BTreeSet<String> = event_types.iter().map(|name| name.to_string()).collect();
    let registry = Arc::clone(registry);
    cache.get_or_create(CacheKey::event_group(event_types), move |cache, hub| {
        let upstream = demux::operation(cache, OpCode::Event)?;
        Ok(pipeline(upstream, hub, move |data: Arc<OpData>| {
            let OpData::Event(event) = &*data else {
                return Step::Skip;
            };
            if !wanted.contains(&event.event_type) {
                return Step::Skip;
            }
            match registry.decode_event(&event.event_type, event.event_data.as_ref()) {
                Ok(payload) => Step::Emit(Arc::new(DecodedEvent::new(
                    event.event_type.clone(),
                    event.event_intent,
                    event.event_data.clone(),
                    payload,
                ))),
                Err(err) => {
                    tracing::warn!(event_type = %event.event_type, error = %err, "skipping undecodable event");
                    Step::Skip
                }
            }
        }))
    })
}
