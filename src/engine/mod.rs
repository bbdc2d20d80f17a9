//! The engine: one obs-websocket session at a time over an injected
//! transport.
//!
//! All mutable state (handshake progress, the active connection and its
//! subscription cache, which doubles as the table of pending requests) sits
//! behind one lock. Each successful transport open starts a new generation
//! with its own root stream and cache; nothing from a previous generation
//! is ever delivered to a later one.


use crate::batch::{self, BatchRequest, BatchResults};
use crate::cache::{Cache, CacheKey, CacheStats, IdleSink, Subscription};
use crate::catalog::{self, DecodedEvent, Event, PayloadRegistry, Request};
use crate::codec::{self, OpData, RawEnvelope, WireEncoding};
use crate::demux;
use crate::error::{EngineError, EngineResult};
use crate::events;
use crate::handshake;
use crate::protocol::{
    EventSubscription, ExecutionType, IdentifiedInfo, OpCode, ReidentifyInfo,
};
use crate::request;
use crate::state::{ConnectionParams, ConnectionState, HandshakeState};
use crate::store::{ConnectionStore, StoreError};
use crate::transport::Transport;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const CLOSE_NORMAL: u16 = 1000;

pub struct EngineBuilder {
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn ConnectionStore>>,
    registry: Option<PayloadRegistry>,
    handshake_timeout: Duration,
    params: Option<ConnectionParams>,
}

impl EngineBuilder {
    pub fn store(mut self, store: Arc<dyn ConnectionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(mut self, registry: PayloadRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn params(mut self, params: ConnectionParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn build(self) -> Engine {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Engine {
            shared: Arc::new(Shared {
                transport: self.transport,
                store: self.store,
                registry: Arc::new(self.registry.unwrap_or_else(PayloadRegistry::with_builtin)),
                handshake_timeout: self.handshake_timeout,
                state: Mutex::new(EngineState {
                    handshake: HandshakeState::Disconnected,
                    params: self.params,
                    attempt: 0,
                    generation: None,
                }),
                state_tx,
            }),
        }
    }
}

/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

struct Shared {
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn ConnectionStore>>,
    registry: Arc<PayloadRegistry>,
    handshake_timeout: Duration,
    state: Mutex<EngineState>,
    state_tx: watch::Sender<ConnectionState>,
}

struct EngineState {
    handshake: HandshakeState,
    params: Option<ConnectionParams>,
    attempt: u64,
    generation: Option<Generation>,
}

/// Everything that belongs to one opened transport connection.
struct Generation {
    id: u64,
    encoding: WireEncoding,
    cache: Cache,
    reader: Option<JoinHandle<()>>,
}

impl Generation {
    /// Fails every live stream with `error`. Must run without the state lock.
    fn teardown(mut self, error: EngineError) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        for entry in self.cache.drain() {
            entry.fail(error.clone());
        }
        self.cache.root().finish(Some(error));
    }
}

impl Engine {
    pub fn builder(transport: Arc<dyn Transport>) -> EngineBuilder {
        EngineBuilder {
            transport,
            store: None,
            registry: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            params: None,
        }
    }

    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::builder(transport).build()
    }

    /// Parameters for the next `connect`.
    pub fn set_connection_params(&self, params: ConnectionParams) {
        self.shared.lock().params = Some(params);
    }

    pub fn connection_params(&self) -> Option<ConnectionParams> {
        self.shared.lock().params.clone()
    }

    /// Loads parameters from the injected store. `Ok(false)` when there is
    /// no store or it holds nothing.
    pub fn load_params_from_store(&self) -> Result<bool, StoreError> {
        let Some(store) = &self.shared.store else {
            return Ok(false);
        };
        match store.load()? {
            Some(params) => {
                self.set_connection_params(params);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn registry(&self) -> &PayloadRegistry {
        &self.shared.registry
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.shared.lock().handshake
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared
            .lock()
            .generation
            .as_ref()
            .map(|generation| generation.cache.stats())
            .unwrap_or_default()
    }

    /// Opens the transport and runs Hello / Identify / Identified.
    pub async fn connect(&self) -> EngineResult<IdentifiedInfo> {
        let (attempt, params) = {
            let mut state = self.shared.lock();
            if state.handshake != HandshakeState::Disconnected {
                return Err(EngineError::AlreadyConnected);
            }
            let params = state.params.clone().ok_or(EngineError::NoConnectionData)?;
            state.attempt += 1;
            self.shared.set_handshake(&mut state, HandshakeState::Connecting);
            (state.attempt, params)
        };
        tracing::info!(url = %params.url(), encoding = %params.encoding, "connecting to obs-websocket");

        match self.handshake(attempt, &params).await {
            Ok(identified) => {
                tracing::info!(
                    rpc_version = identified.negotiated_rpc_version,
                    "obs-websocket session identified"
                );
                if let Some(store) = &self.shared.store {
                    if let Err(err) = store.save(&params) {
                        tracing::warn!(error = %err, "failed to persist connection parameters");
                    }
                }
                Ok(identified)
            }
            Err(err) => {
                tracing::warn!(error = %err, "connection attempt failed");
                self.shared.abort_attempt(attempt, &err).await;
                Err(err)
            }
        }
    }

    async fn handshake(&self, attempt: u64, params: &ConnectionParams) -> EngineResult<IdentifiedInfo> {
        let shared = &self.shared;
        let events = shared
            .transport
            .connect(&params.endpoint())
            .await
            .map_err(|err| EngineError::disconnected(None, err.to_string()))?;

        let opened = {
            let mut state = shared.lock();
            if state.attempt == attempt && state.handshake == HandshakeState::Connecting {
                let sink = Arc::downgrade(shared);
                let sink: Weak<dyn IdleSink> = sink;
                let mut cache = Cache::new(attempt, sink, Handle::current());
                // Subscribe before the reader starts so Hello cannot be missed.
                let envelopes = demux::envelopes(&mut cache)?;
                let weak = Arc::downgrade(shared);
                let reader = tokio::spawn(demux::run_reader(
                    events,
                    Arc::clone(cache.root()),
                    move |code, reason| {
                        if let Some(shared) = weak.upgrade() {
                            shared.connection_lost(attempt, code, reason);
                        }
                    },
                ));
                state.generation = Some(Generation {
                    id: attempt,
                    encoding: params.encoding,
                    cache,
                    reader: Some(reader),
                });
                shared.set_handshake(&mut state, HandshakeState::AwaitingHello);
                Some(envelopes)
            } else {
                None
            }
        };
        let Some(mut envelopes) = opened else {
            let _ = shared
                .transport
                .disconnect(CLOSE_NORMAL, "connection attempt aborted")
                .await;
            return Err(EngineError::disconnected(None, "connection attempt aborted"));
        };

        let hello = handshake::await_hello(&mut envelopes, shared.handshake_timeout).await?;
        tracing::debug!(
            obs_websocket = %hello.obs_web_socket_version,
            rpc_version = hello.rpc_version,
            authentication = hello.authentication.is_some(),
            "received Hello"
        );
        let identify = handshake::identify_for(
            &hello,
            params.password.as_deref(),
            params.event_subscriptions,
        )?;
        shared.advance(attempt, HandshakeState::AwaitingIdentified)?;
        shared.send_op(OpData::Identify(identify)).await?;

        let identified = handshake::await_identified(&mut envelopes, shared.handshake_timeout).await?;
        shared.advance(attempt, HandshakeState::Active)?;
        Ok(identified)
    }

    /// Closes the session. Every outstanding request and stream fails with
    /// `Disconnected`.
    pub async fn disconnect(&self) {
        let generation = {
            let mut state = self.shared.lock();
            if state.handshake == HandshakeState::Disconnected {
                return;
            }
            self.shared.set_handshake(&mut state, HandshakeState::Disconnected);
            state.generation.take()
        };
        tracing::info!("disconnecting from obs-websocket");
        if let Some(generation) = generation {
            generation.teardown(EngineError::disconnected(
                Some(CLOSE_NORMAL),
                "disconnected by client",
            ));
        }
        if let Err(err) = self
            .shared
            .transport
            .disconnect(CLOSE_NORMAL, "client disconnect")
            .await
        {
            tracing::debug!(error = %err, "transport close failed");
        }
    }

    /// Changes the event subscription mask of the live session.
    pub async fn reidentify(&self, event_subscriptions: EventSubscription) -> EngineResult<IdentifiedInfo> {
        let mut identified = self.with_active(|cache| demux::operation(cache, OpCode::Identified))?;
        self.shared
            .send_op(OpData::Reidentify(ReidentifyInfo {
                event_subscriptions: Some(event_subscriptions),
            }))
            .await?;
        let data = tokio::time::timeout(
            self.shared.handshake_timeout,
            request::await_response(&mut identified),
        )
        .await
        .map_err(|_| EngineError::TimedOutWaitingToConnect)??;
        let OpData::Identified(info) = &*data else {
            return Err(EngineError::DecodeFailed(format!(
                "expected Identified, received {}",
                data.op_code()
            )));
        };
        if let Some(params) = self.shared.lock().params.as_mut() {
            params.event_subscriptions = event_subscriptions;
        }
        tracing::info!(event_subscriptions = %event_subscriptions, "session re-identified");
        Ok(info.clone())
    }

    /// Sends one request and waits for its response.
    pub async fn send_request<R: Request>(&self, request: &R) -> EngineResult<R::Response> {
        let data = catalog::encode_data(request)?;
        let response = self.send_request_raw(R::TYPE, data).await?;
        catalog::decode_data(response.as_ref())
    }

    /// Untyped form of [`Engine::send_request`]. Dropping the future
    /// abandons the request.
    pub async fn send_request_raw(
        &self,
        request_type: &str,
        data: Option<Value>,
    ) -> EngineResult<Option<Value>> {
        let request_id = request::new_request_id();
        let mut response = self.with_active(|cache| request::response_stream(cache, &request_id))?;
        tracing::debug!(request_type, request_id = %request_id, "sending request");
        self.shared
            .send_op(request::envelope(request_type, &request_id, data))
            .await?;
        request::into_result(request::await_response(&mut response).await?)
    }

    /// Sends `requests` as one batch. `execution_type` and `halt_on_failure`
    /// are forwarded to the server as given.
    pub async fn send_request_batch(
        &self,
        execution_type: Option<ExecutionType>,
        halt_on_failure: Option<bool>,
        requests: Vec<BatchRequest>,
    ) -> EngineResult<BatchResults> {
        let prepared = batch::prepare(execution_type, halt_on_failure, requests);
        let mut response =
            self.with_active(|cache| batch::response_stream(cache, prepared.batch_id()))?;
        tracing::debug!(
            batch_id = %prepared.batch_id(),
            items = prepared.envelope.requests.len(),
            "sending request batch"
        );
        self.shared
            .send_op(OpData::RequestBatch(prepared.envelope.clone()))
            .await?;
        let response = request::await_response(&mut response).await?;
        Ok(prepared.collect(response))
    }

    /// Events of type `E`. With `first_only` the stream ends after one.
    pub fn listen_for_event<E: Event>(&self, first_only: bool) -> EngineResult<Subscription<Arc<E>>> {
        let subscription = self.with_generation(events::event_stream::<E>)?;
        Ok(if first_only {
            subscription.first_only()
        } else {
            subscription
        })
    }

    /// Events of any of `event_types`, merged, decoded through the registry.
    pub fn listen_for_events(&self, event_types: &[&str]) -> EngineResult<Subscription<Arc<DecodedEvent>>> {
        let registry = Arc::clone(&self.shared.registry);
        self.with_generation(|cache| events::event_group_stream(cache, &registry, event_types))
    }

    pub fn envelopes(&self) -> EngineResult<Subscription<Arc<RawEnvelope>>> {
        self.with_generation(demux::envelopes)
    }

    pub fn op_data(&self) -> EngineResult<Subscription<Arc<OpData>>> {
        self.with_generation(demux::op_data)
    }

    pub fn operation(&self, op: OpCode) -> EngineResult<Subscription<Arc<OpData>>> {
        self.with_generation(|cache| demux::operation(cache, op))
    }

    // Returned subscriptions leave the lock scope intact; `open` must not
    // drop one it created.
    fn with_generation<T, F>(&self, open: F) -> EngineResult<T>
    where
        F: FnOnce(&mut Cache) -> EngineResult<T>,
    {
        let mut state = self.shared.lock();
        let generation = state
            .generation
            .as_mut()
            .ok_or_else(EngineError::not_connected)?;
        open(&mut generation.cache)
    }

    fn with_active<T, F>(&self, open: F) -> EngineResult<T>
    where
        F: FnOnce(&mut Cache) -> EngineResult<T>,
    {
        let mut state = self.shared.lock();
        if state.handshake != HandshakeState::Active {
            return Err(EngineError::not_connected());
        }
        let generation = state
            .generation
            .as_mut()
            .ok_or_else(EngineError::not_connected)?;
        open(&mut generation.cache)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_handshake(&self, state: &mut EngineState, next: HandshakeState) {
        state.handshake = next;
        let connection = next.connection_state();
        self.state_tx.send_if_modified(|current| {
            if *current == connection {
                false
            } else {
                *current = connection;
                true
            }
        });
    }

    /// Moves a still-current attempt forward.
    fn advance(&self, attempt: u64, next: HandshakeState) -> EngineResult<()> {
        let mut state = self.lock();
        let current = state.attempt == attempt
            && state.generation.is_some()
            && state.handshake != HandshakeState::Disconnected;
        if !current {
            return Err(EngineError::disconnected(None, "connection attempt aborted"));
        }
        self.set_handshake(&mut state, next);
        Ok(())
    }

    async fn send_op(&self, data: OpData) -> EngineResult<()> {
        let encoding = {
            let state = self.lock();
            state
                .generation
                .as_ref()
                .map(|generation| generation.encoding)
                .ok_or_else(EngineError::not_connected)?
        };
        let frame = codec::encode(&data, encoding)?;
        self.transport
            .send(frame)
            .await
            .map_err(|err| EngineError::disconnected(None, err.to_string()))
    }

    /// Rolls back a failed attempt unless something else already did.
    async fn abort_attempt(&self, attempt: u64, error: &EngineError) {
        let generation = {
            let mut state = self.lock();
            if state.attempt != attempt || state.handshake == HandshakeState::Disconnected {
                return;
            }
            self.set_handshake(&mut state, HandshakeState::Disconnected);
            state.generation.take()
        };
        if let Some(generation) = generation {
            generation.teardown(error.clone());
        }
        let reason = error.to_string();
        if let Err(err) = self.transport.disconnect(CLOSE_NORMAL, &reason).await {
            tracing::debug!(error = %err, "transport close failed");
        }
    }

    fn connection_lost(&self, generation: u64, code: Option<u16>, reason: String) {
        let lost = {
            let mut state = self.lock();
            if state.generation.as_ref().map(|g| g.id) != Some(generation) {
                return;
            }
            self.set_handshake(&mut state, HandshakeState::Disconnected);
            state.generation.take()
        };
        tracing::warn!(code = ?code, reason = %reason, "obs-websocket connection lost");
        if let Some(lost) = lost {
            lost.teardown(EngineError::disconnected(code, reason));
        }
    }
}

impl IdleSink for Shared {
    fn hub_idle(&self, generation: u64, key: &CacheKey, hub_id: u64) {
        let evicted = {
            let mut state = self.lock();
            match state.generation.as_mut() {
                Some(current) if current.id == generation => current.cache.evict_idle(key, hub_id),
                _ => None,
            }
        };
        if let Some(entry) = evicted {
            tracing::debug!(key = %key, "no subscribers left; tearing down shared stream");
            entry.shutdown();
        }
    }

    fn hub_finished(&self, generation: u64, key: &CacheKey, hub_id: u64) {
        let evicted = {
            let mut state = self.lock();
            match state.generation.as_mut() {
                Some(current) if current.id == generation => current.cache.evict(key, hub_id),
                _ => None,
            }
        };
        drop(evicted);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let generation = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
            .take();
        if let Some(generation) = generation {
            generation.teardown(EngineError::disconnected(None, "engine dropped"));
        }
    }
}
