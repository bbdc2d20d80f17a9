//! Shared, reference-counted streams keyed by what they carry.
//!
//! A [`Hub`] is one live pipeline fanned out to any number of
//! [`Subscription`]s. The [`Cache`] maps a [`CacheKey`] to at most one live
//! hub so N callers asking for the same thing share one upstream.
//!
//! Lock order is engine state, then hub. A hub never calls back into the
//! engine while holding its own lock, and a `Subscription` must never be
//! dropped while the engine state lock is held: dropping the last one
//! re-enters the engine to evict its entry.

use crate::error::{EngineError, EngineResult};
use crate::protocol::OpCode;
use futures_util::Stream;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Envelopes,
    OpData,
    Operation(OpCode),
    Response(String),
    BatchResponse(String),
    Event(String),
    EventGroup(String),
}

impl CacheKey {
    /// Group key for a set of event types: sorted, de-duplicated, comma-joined.
    pub fn event_group<S: AsRef<str>>(types: &[S]) -> Self {
        let mut names: Vec<&str> = types.iter().map(AsRef::as_ref).collect();
        names.sort_unstable();
        names.dedup();
        CacheKey::EventGroup(names.join(","))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Envelopes => f.write_str("envelopes"),
            CacheKey::OpData => f.write_str("op-data"),
            CacheKey::Operation(op) => write!(f, "operation:{op}"),
            CacheKey::Response(id) => write!(f, "response:{id}"),
            CacheKey::BatchResponse(id) => write!(f, "batch-response:{id}"),
            CacheKey::Event(name) => write!(f, "event:{name}"),
            CacheKey::EventGroup(names) => write!(f, "event-group:{names}"),
        }
    }
}

/// Receives lifecycle notices from hubs that live in a [`Cache`].
pub(crate) trait IdleSink: Send + Sync {
    /// The last subscriber of a hub went away.
    fn hub_idle(&self, generation: u64, key: &CacheKey, hub_id: u64);
    /// A hub completed or failed on its own.
    fn hub_finished(&self, generation: u64, key: &CacheKey, hub_id: u64);
}

/// Future that feeds a hub. Spawned once the hub is registered.
pub(crate) type Upstream = Pin<Box<dyn Future<Output = ()> + Send>>;

type Delivery<T> = Result<T, EngineError>;

pub struct Hub<T> {
    id: u64,
    generation: u64,
    key: CacheKey,
    sink: Option<Weak<dyn IdleSink>>,
    inner: Mutex<HubInner<T>>,
}

struct HubInner<T> {
    subscribers: Vec<(u64, mpsc::UnboundedSender<Delivery<T>>)>,
    next_subscriber: u64,
    closed: bool,
    upstream: Option<AbortHandle>,
}

impl<T: Clone + Send + 'static> Hub<T> {
    pub(crate) fn new(
        id: u64,
        generation: u64,
        key: CacheKey,
        sink: Option<Weak<dyn IdleSink>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            generation,
            key,
            sink,
            inner: Mutex::new(HubInner {
                subscribers: Vec::new(),
                next_subscriber: 0,
                closed: false,
                upstream: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HubInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an observer that sees every item published from now on.
    /// `None` once the hub has completed.
    pub(crate) fn subscribe(self: &Arc<Self>) -> Option<Subscription<T>> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.subscribers.push((id, tx));
        Some(Subscription {
            rx,
            hub: Arc::clone(self),
            subscriber: id,
            remaining: None,
            done: false,
            detached: false,
        })
    }

    pub(crate) fn publish(&self, item: T) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner
            .subscribers
            .retain(|(_, tx)| tx.send(Ok(item.clone())).is_ok());
    }

    /// Ends the stream for every subscriber, with `error` as the last item
    /// when given.
    pub(crate) fn finish(&self, error: Option<EngineError>) {
        let (subscribers, upstream) = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            (std::mem::take(&mut inner.subscribers), inner.upstream.take())
        };
        if let Some(upstream) = upstream {
            upstream.abort();
        }
        if let Some(error) = error {
            for (_, tx) in &subscribers {
                let _ = tx.send(Err(error.clone()));
            }
        }
        drop(subscribers);
        if let Some(sink) = self.sink.as_ref().and_then(Weak::upgrade) {
            sink.hub_finished(self.generation, &self.key, self.id);
        }
    }

    pub(crate) fn set_upstream(&self, handle: AbortHandle) {
        let mut inner = self.lock();
        if inner.closed {
            handle.abort();
        } else {
            inner.upstream = Some(handle);
        }
    }

    fn detach(&self, subscriber: u64) {
        let idle = {
            let mut inner = self.lock();
            inner.subscribers.retain(|(id, _)| *id != subscriber);
            inner.subscribers.is_empty() && !inner.closed
        };
        if idle {
            if let Some(sink) = self.sink.as_ref().and_then(Weak::upgrade) {
                sink.hub_idle(self.generation, &self.key, self.id);
            }
        }
    }
}

/// Type-erased view of a hub so one map can hold every key's stream.
pub(crate) trait CacheEntry: Send + Sync {
    fn hub_id(&self) -> u64;
    fn subscriber_count(&self) -> usize;
    fn is_closed(&self) -> bool;
    fn fail(&self, error: EngineError);
    /// Closes the hub silently and aborts whatever feeds it.
    fn shutdown(&self);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Clone + Send + 'static> CacheEntry for Hub<T> {
    fn hub_id(&self) -> u64 {
        self.id
    }

    fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn fail(&self, error: EngineError) {
        self.finish(Some(error));
    }

    fn shutdown(&self) {
        let upstream = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.subscribers.clear();
            inner.upstream.take()
        };
        if let Some(upstream) = upstream {
            upstream.abort();
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// One observer of a shared stream. Yields `Err` at most once, as its last
/// item. Dropping it detaches from the hub.
pub struct Subscription<T: Clone + Send + 'static> {
    rx: mpsc::UnboundedReceiver<Delivery<T>>,
    hub: Arc<Hub<T>>,
    subscriber: u64,
    remaining: Option<usize>,
    done: bool,
    detached: bool,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Completes after the first item.
    pub fn first_only(self) -> Self {
        self.take_items(1)
    }

    pub(crate) fn take_items(mut self, count: usize) -> Self {
        self.remaining = Some(count);
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.hub.key
    }

    fn detach(&mut self) {
        if !self.detached {
            self.detached = true;
            self.hub.detach(self.subscriber);
        }
    }
}

impl<T: Clone + Send + 'static> Stream for Subscription<T> {
    type Item = Delivery<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done || this.remaining == Some(0) {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(item))) => {
                if let Some(remaining) = this.remaining.as_mut() {
                    *remaining -= 1;
                    if *remaining == 0 {
                        this.done = true;
                        this.detach();
                    }
                }
                Poll::Ready(Some(Ok(item)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: Clone + Send + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.hub.key)
            .field("subscriber", &self.subscriber)
            .field("done", &self.done)
            .finish()
    }
}

/// What a pipeline does with one upstream item.
pub(crate) enum Step<T> {
    Skip,
    Emit(T),
    EmitAndComplete(T),
}

/// Drives `hub` from `upstream`, mapping each item through `step`. An
/// upstream error or end is passed on to the hub.
pub(crate) fn pipeline<U, T, F>(mut upstream: Subscription<U>, hub: Arc<Hub<T>>, mut step: F) -> Upstream
where
    U: Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
    F: FnMut(U) -> Step<T> + Send + 'static,
{
    use futures_util::StreamExt;

    Box::pin(async move {
        while let Some(item) = upstream.next().await {
            match item {
                Ok(item) => match step(item) {
                    Step::Skip => {}
                    Step::Emit(out) => hub.publish(out),
                    Step::EmitAndComplete(out) => {
                        hub.publish(out);
                        hub.finish(None);
                        return;
                    }
                },
                Err(err) => {
                    hub.finish(Some(err));
                    return;
                }
            }
        }
        hub.finish(None);
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Live entries, not counting the root envelope stream.
    pub entries: usize,
    /// Pipelines built over the lifetime of the current connection.
    pub builds: u64,
}

/// Per-connection registry of live shared streams. The root hub carries
/// every decoded envelope and lives as long as the connection.
pub(crate) struct Cache {
    generation: u64,
    root: Arc<Hub<Arc<crate::codec::RawEnvelope>>>,
    entries: HashMap<CacheKey, Arc<dyn CacheEntry>>,
    next_hub: u64,
    builds: u64,
    sink: Weak<dyn IdleSink>,
    // Pipelines run here, whichever thread opens them.
    runtime: Handle,
}

impl Cache {
    pub(crate) fn new(generation: u64, sink: Weak<dyn IdleSink>, runtime: Handle) -> Self {
        Self {
            generation,
            root: Hub::new(0, generation, CacheKey::Envelopes, None),
            entries: HashMap::new(),
            next_hub: 1,
            builds: 0,
            sink,
            runtime,
        }
    }

    pub(crate) fn root(&self) -> &Arc<Hub<Arc<crate::codec::RawEnvelope>>> {
        &self.root
    }

    /// Returns a subscription to the live stream for `key`, building it with
    /// `build` when none exists. `build` may subscribe to parent keys through
    /// the cache it is handed; it must not fail after doing so.
    pub(crate) fn get_or_create<T, F>(&mut self, key: CacheKey, build: F) -> EngineResult<Subscription<T>>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&mut Cache, Arc<Hub<T>>) -> EngineResult<Upstream>,
    {
        if let Some(entry) = self.entries.get(&key) {
            if !entry.is_closed() {
                let hub = Arc::clone(entry).into_any().downcast::<Hub<T>>().map_err(|_| {
                    EngineError::EventTypeConversionFailed(format!(
                        "{key} is already bound to a different payload type"
                    ))
                })?;
                if let Some(subscription) = hub.subscribe() {
                    return Ok(subscription);
                }
            }
        }

        let hub = Hub::new(self.next_hub, self.generation, key.clone(), Some(self.sink.clone()));
        self.next_hub += 1;
        let upstream = build(self, Arc::clone(&hub))?;
        let subscription = hub
            .subscribe()
            .ok_or_else(|| EngineError::disconnected(None, format!("{key} closed while opening")))?;
        self.entries.insert(key.clone(), hub.clone() as Arc<dyn CacheEntry>);
        self.builds += 1;
        hub.set_upstream(self.runtime.spawn(upstream).abort_handle());
        tracing::debug!(key = %key, hub = hub.id, "shared stream built");
        Ok(subscription)
    }

    /// Removes `key` if it still names hub `hub_id` and nobody listens.
    pub(crate) fn evict_idle(&mut self, key: &CacheKey, hub_id: u64) -> Option<Arc<dyn CacheEntry>> {
        match self.entries.get(key) {
            Some(entry) if entry.hub_id() == hub_id && entry.subscriber_count() == 0 => {
                self.entries.remove(key)
            }
            _ => None,
        }
    }

    /// Removes `key` if it still names hub `hub_id`.
    pub(crate) fn evict(&mut self, key: &CacheKey, hub_id: u64) -> Option<Arc<dyn CacheEntry>> {
        match self.entries.get(key) {
            Some(entry) if entry.hub_id() == hub_id => self.entries.remove(key),
            _ => None,
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<Arc<dyn CacheEntry>> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            builds: self.builds,
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn hub<T: Clone + Send + 'static>() -> Arc<Hub<T>> {
        Hub::new(1, 1, CacheKey::Event("Test".to_string()), None)
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_item_in_order() {
        let hub = hub::<u32>();
        let mut a = hub.subscribe().unwrap();
        let mut b = hub.subscribe().unwrap();
        for n in 0..5 {
            hub.publish(n);
        }
        hub.finish(None);

        let a: Vec<u32> = (&mut a).map(|item| item.unwrap()).collect().await;
        let b: Vec<u32> = (&mut b).map(|item| item.unwrap()).collect().await;
        assert_eq!(a, vec![0, 1, 2, 3, 4]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn late_subscriber_starts_from_subscription_point() {
        let hub = hub::<u32>();
        let _early = hub.subscribe().unwrap();
        hub.publish(1);
        let mut late = hub.subscribe().unwrap();
        hub.publish(2);
        assert_eq!(late.next().await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn failure_is_the_last_item() {
        let hub = hub::<u32>();
        let mut sub = hub.subscribe().unwrap();
        hub.publish(7);
        hub.finish(Some(EngineError::not_connected()));

        assert_eq!(sub.next().await.unwrap().unwrap(), 7);
        assert!(sub.next().await.unwrap().unwrap_err().is_disconnected());
        assert!(sub.next().await.is_none());
        assert!(hub.subscribe().is_none());
    }

    #[tokio::test]
    async fn first_only_completes_after_one_item() {
        let hub = hub::<u32>();
        let mut sub = hub.subscribe().unwrap().first_only();
        hub.publish(1);
        hub.publish(2);
        assert_eq!(sub.next().await.unwrap().unwrap(), 1);
        assert!(sub.next().await.is_none());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn group_key_is_order_and_duplicate_insensitive() {
        assert_eq!(
            CacheKey::event_group(&["b", "a", "b"]),
            CacheKey::EventGroup("a,b".to_string())
        );
        assert_eq!(
            CacheKey::event_group(&["a", "b"]),
            CacheKey::event_group(&["b", "a"])
        );
    }

    struct Recorder {
        idle: Mutex<Vec<(CacheKey, u64)>>,
        finished: Mutex<Vec<(CacheKey, u64)>>,
    }

    impl IdleSink for Recorder {
        fn hub_idle(&self, _generation: u64, key: &CacheKey, hub_id: u64) {
            self.idle.lock().unwrap().push((key.clone(), hub_id));
        }

        fn hub_finished(&self, _generation: u64, key: &CacheKey, hub_id: u64) {
            self.finished.lock().unwrap().push((key.clone(), hub_id));
        }
    }

    fn recorder() -> Arc<Recorder> {
        Arc::new(Recorder {
            idle: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn get_or_create_builds_once_per_key() {
        let sink = recorder();
        let weak: Weak<dyn IdleSink> = Arc::downgrade(&(sink.clone() as Arc<dyn IdleSink>));
        let mut cache = Cache::new(1, weak, Handle::current());
        let key = CacheKey::Operation(OpCode::Event);

        let build = |cache: &mut Cache, hub: Arc<Hub<Arc<crate::codec::RawEnvelope>>>| {
            let upstream = cache.root().subscribe().unwrap();
            Ok(pipeline(upstream, hub, Step::Emit))
        };
        let _a = cache.get_or_create(key.clone(), build).unwrap();
        let _b = cache.get_or_create(key.clone(), build).unwrap();

        assert_eq!(cache.stats(), CacheStats { entries: 1, builds: 1 });
    }

    #[tokio::test]
    async fn mismatched_payload_type_is_rejected() {
        let sink = recorder();
        let weak: Weak<dyn IdleSink> = Arc::downgrade(&(sink.clone() as Arc<dyn IdleSink>));
        let mut cache = Cache::new(1, weak, Handle::current());
        let key = CacheKey::Event("Test".to_string());

        let _numbers = cache
            .get_or_create::<u32, _>(key.clone(), |_, _| Ok(Box::pin(std::future::pending::<()>())))
            .unwrap();
        let err = cache
            .get_or_create::<String, _>(key, |_, _| Ok(Box::pin(std::future::pending::<()>())))
            .unwrap_err();
        assert!(matches!(err, EngineError::EventTypeConversionFailed(_)));
    }

    #[tokio::test]
    async fn last_subscriber_leaving_reports_idle() {
        let sink = recorder();
        let weak: Weak<dyn IdleSink> = Arc::downgrade(&(sink.clone() as Arc<dyn IdleSink>));
        let mut cache = Cache::new(1, weak, Handle::current());
        let key = CacheKey::Response("r1".to_string());

        let a = cache
            .get_or_create::<u32, _>(key.clone(), |_, _| Ok(Box::pin(std::future::pending::<()>())))
            .unwrap();
        let b = cache
            .get_or_create::<u32, _>(key.clone(), |_, _| Ok(Box::pin(std::future::pending::<()>())))
            .unwrap();
        drop(a);
        assert!(sink.idle.lock().unwrap().is_empty());
        drop(b);
        assert_eq!(sink.idle.lock().unwrap().as_slice(), &[(key.clone(), 1)]);

        assert!(cache.evict_idle(&key, 1).is_some());
        assert!(!cache.contains(&key));
    }
}
