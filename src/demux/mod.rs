use crate::cache::{pipeline, Cache, CacheKey, Hub, Step, Subscription};
use crate::codec::{self, OpData, RawEnvelope};
use crate::error::{EngineError, EngineResult};
use crate::protocol::OpCode;
use crate::transport::{Frame, TransportEvent, TransportEvents};
use std::sync::Arc;

/// Reads one connection's transport events into the root hub until the
/// socket goes away, then reports how it closed.
pub(crate) async fn run_reader<F>(
    mut events: TransportEvents,
    root: Arc<Hub<Arc<RawEnvelope>>>,
    on_closed: F,
) where
    F: FnOnce(Option<u16>, String) + Send + 'static,
{
    while let Some(event) = events.recv().await {
        let frame = match event {
            TransportEvent::Text(text) => Frame::Text(text),
            TransportEvent::Data(bytes) => Frame::Binary(bytes),
            TransportEvent::Connected { subprotocol } => {
                tracing::debug!(subprotocol = ?subprotocol, "transport connected");
                continue;
            }
            TransportEvent::Disconnected { code, reason } => {
                on_closed(code, reason);
                return;
            }
        };
        match codec::decode_frame(&frame) {
            Ok(raw) => {
                tracing::trace!(op = raw.op, "inbound envelope");
                root.publish(Arc::new(raw));
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping undecodable frame");
            }
        }
    }
    on_closed(None, "transport event stream ended".to_string());
}

/// Every decoded envelope, as received.
pub(crate) fn envelopes(cache: &mut Cache) -> EngineResult<Subscription<Arc<RawEnvelope>>> {
    cache
        .root()
        .subscribe()
        .ok_or_else(EngineError::not_connected)
}

/// Every envelope whose payload fits its opcode. Envelopes that do not are
/// logged and skipped.
pub(crate) fn op_data(cache: &mut Cache) -> EngineResult<Subscription<Arc<OpData>>> {
    cache.get_or_create(CacheKey::OpData, |cache, hub| {
        let upstream = envelopes(cache)?;
        Ok(pipeline(upstream, hub, |raw: Arc<RawEnvelope>| {
            match OpData::from_raw(&raw) {
                Ok(data) => Step::Emit(Arc::new(data)),
                Err(err) => {
                    tracing::warn!(op = raw.op, error = %err, "dropping malformed envelope");
                    Step::Skip
                }
            }
        }))
    })
}

pub(crate) fn operation(cache: &mut Cache, op: OpCode) -> EngineResult<Subscription<Arc<OpData>>> {
    cache.get_or_create(CacheKey::Operation(op), move |cache, hub| {
        let upstream = op_data(cache)?;
        Ok(pipeline(upstream, hub, move |data: Arc<OpData>| {
            if data.op_code() == op {
                Step::Emit(data)
            } else {
                Step::Skip
            }
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireEncoding;
    use crate::protocol::{EventEnvelope, EventSubscription};
    use futures_util::StreamExt;
    use serde_json::json;
    use tokio::sync::{mpsc, oneshot};

    fn scene_event(name: &str) -> OpData {
        OpData::Event(EventEnvelope {
            event_type: "CurrentProgramSceneChanged".to_string(),
            event_intent: EventSubscription::SCENES,
            event_data: Some(json!({ "sceneName": name })),
        })
    }

    fn as_event(frame: Frame) -> TransportEvent {
        match frame {
            Frame::Text(text) => TransportEvent::Text(text),
            Frame::Binary(bytes) => TransportEvent::Data(bytes),
        }
    }

    #[tokio::test]
    async fn reader_decodes_both_encodings_and_skips_garbage() {
        let root = Hub::new(0, 1, CacheKey::Envelopes, None);
        let mut sub = root.subscribe().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = oneshot::channel();
        tokio::spawn(run_reader(rx, root.clone(), move |code, reason| {
            let _ = closed_tx.send((code, reason));
        }));

        tx.send(TransportEvent::Connected { subprotocol: None }).unwrap();
        tx.send(as_event(codec::encode(&scene_event("A"), WireEncoding::Json).unwrap()))
            .unwrap();
        tx.send(TransportEvent::Text("{ not json".to_string())).unwrap();
        tx.send(as_event(codec::encode(&scene_event("B"), WireEncoding::MsgPack).unwrap()))
            .unwrap();
        tx.send(TransportEvent::Disconnected {
            code: Some(4011),
            reason: "kicked".to_string(),
        })
        .unwrap();

        let first = sub.next().await.unwrap().unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(OpData::from_raw(&first).unwrap(), scene_event("A"));
        assert_eq!(OpData::from_raw(&second).unwrap(), scene_event("B"));
        assert_eq!(closed_rx.await.unwrap(), (Some(4011), "kicked".to_string()));
    }

    #[tokio::test]
    async fn reader_reports_a_dropped_event_channel() {
        let root = Hub::new(0, 1, CacheKey::Envelopes, None);
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = oneshot::channel();
        tokio::spawn(run_reader(rx, root, move |code, reason| {
            let _ = closed_tx.send((code, reason));
        }));
        drop(tx);
        let (code, _) = closed_rx.await.unwrap();
        assert_eq!(code, None);
    }
}
