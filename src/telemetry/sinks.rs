use super::events::ClientEvent;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tower::util::BoxCloneService;
use tower::Service;

type SinkFuture = Pin<Box<dyn Future<Output = Result<(), Infallible>> + Send>>;

/// Type-erased sink the client stores.
pub type BoxedSink = BoxCloneService<ClientEvent, (), Infallible>;

/// A telemetry sink that consumes client events.
pub trait TelemetrySink:
    tower::Service<ClientEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
pub async fn emit_best_effort<S>(sink: S, event: ClientEvent)
where
    S: tower::Service<ClientEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Shared, replaceable sink slot.
///
/// `BoxCloneService` is `Send` but not `Sync`, so the slot is guarded and each emit works on its
/// own clone.
#[derive(Clone)]
pub struct SinkHandle {
    slot: Arc<Mutex<BoxedSink>>,
}

impl SinkHandle {
    pub fn new<S>(sink: S) -> Self
    where
        S: tower::Service<ClientEvent, Response = (), Error = Infallible> + Clone + Send + 'static,
        S::Future: Send + 'static,
    {
        Self { slot: Arc::new(Mutex::new(BoxCloneService::new(sink))) }
    }

    /// Route future events to `sink`.
    pub fn replace<S>(&self, sink: S)
    where
        S: tower::Service<ClientEvent, Response = (), Error = Infallible> + Clone + Send + 'static,
        S::Future: Send + 'static,
    {
        *self.lock() = BoxCloneService::new(sink);
    }

    pub async fn emit(&self, event: ClientEvent) {
        let sink = self.lock().clone();
        emit_best_effort(sink, event).await;
    }

    fn lock(&self) -> MutexGuard<'_, BoxedSink> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SinkHandle {
    fn default() -> Self {
        Self::new(NullSink)
    }
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle").finish_non_exhaustive()
    }
}

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<ClientEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: ClientEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// A telemetry sink that logs events using the `tracing` crate.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<ClientEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: ClientEvent) -> Self::Future {
        tracing::info!(kind = event.kind(), event = %event, "client_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A telemetry sink that stores events in memory, evicting the oldest past capacity.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<ClientEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.lock().clone()
    }

    /// Events of one kind, see [`ClientEvent::kind`].
    pub fn events_of(&self, kind: &str) -> Vec<ClientEvent> {
        self.lock().iter().filter(|e| e.kind() == kind).cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ClientEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<ClientEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: ClientEvent) -> Self::Future {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

/// A streaming telemetry sink that broadcasts events to multiple subscribers.
///
/// Events sent while no subscriber is listening are counted as dropped.
#[derive(Clone, Debug)]
pub struct StreamingSink {
    sender: Arc<tokio::sync::broadcast::Sender<ClientEvent>>,
    dropped: Arc<AtomicU64>,
    last_drop_ns: Arc<AtomicU64>,
}

impl StreamingSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
            dropped: Arc::new(AtomicU64::new(0)),
            last_drop_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn last_drop(&self) -> Option<SystemTime> {
        match self.last_drop_ns.load(Ordering::Relaxed) {
            0 => None,
            ns => UNIX_EPOCH.checked_add(Duration::from_nanos(ns)),
        }
    }
}

impl Service<ClientEvent> for StreamingSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: ClientEvent) -> Self::Future {
        if self.sender.send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos().min(u128::from(u64::MAX)) as u64)
                .unwrap_or(1);
            self.last_drop_ns.store(now.max(1), Ordering::Relaxed);
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for StreamingSink {
    type SinkError = Infallible;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn started(id: &str) -> ClientEvent {
        ClientEvent::RequestStarted {
            request_id: id.into(),
            method: "GET".into(),
            endpoint: "/tasks".into(),
        }
    }

    #[tokio::test]
    async fn test_null_sink() {
        let mut sink = NullSink;
        sink.call(started("a")).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_sink() {
        let mut sink = MemorySink::with_capacity(2);
        assert!(sink.is_empty());
        assert_eq!(sink.len(), 0);

        let event1 = started("a");
        let event2 = ClientEvent::RetryScheduled {
            request_id: "a".into(),
            attempt: 2,
            delay: Duration::from_millis(100),
            error_kind: ErrorKind::Network,
        };
        let event3 = ClientEvent::RequestSucceeded {
            request_id: "a".into(),
            status: 200,
            attempts: 2,
            duration: Duration::from_millis(130),
        };

        sink.call(event1.clone()).await.unwrap();
        sink.call(event2.clone()).await.unwrap();
        sink.call(event3.clone()).await.unwrap(); // should evict oldest

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.evicted(), 1);
        assert_eq!(sink.events(), vec![event2, event3.clone()]);
        assert_eq!(sink.events_of("request_succeeded"), vec![event3]);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_streaming_sink_drop_counts() {
        let sink = StreamingSink::new(1);
        let mut tx = sink.clone();

        tx.call(started("nobody-listening")).await.unwrap();

        assert!(sink.dropped_count() >= 1);
        assert!(sink.last_drop().is_some());
    }

    #[tokio::test]
    async fn test_streaming_sink_delivers_to_subscriber() {
        let sink = StreamingSink::new(8);
        let mut rx = sink.subscribe();
        let mut tx = sink.clone();

        tx.call(started("b")).await.unwrap();
        let got = rx.recv().await.expect("message");
        assert_eq!(got.request_id(), Some("b"));
        assert_eq!(sink.dropped_count(), 0);
    }

    #[tokio::test]
    async fn test_emit_best_effort_swallows_errors() {
        #[derive(Clone)]
        struct Fails;
        impl TelemetrySink for Fails {
            type SinkError = std::io::Error;
        }
        impl tower::Service<ClientEvent> for Fails {
            type Response = ();
            type Error = std::io::Error;
            type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;
            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }
            fn call(&mut self, _req: ClientEvent) -> Self::Future {
                Box::pin(async { Err(std::io::Error::other("fail")) })
            }
        }

        emit_best_effort(Fails, started("c")).await;
    }

    #[tokio::test]
    async fn test_boxed_sink_forwards_to_inner() {
        let memory = MemorySink::new();
        let boxed: BoxedSink = BoxCloneService::new(memory.clone());
        emit_best_effort(boxed, started("d")).await;
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn test_sink_handle_replace_redirects_events() {
        let first = MemorySink::new();
        let second = MemorySink::new();
        let handle = SinkHandle::new(first.clone());
        handle.emit(started("f")).await;
        handle.replace(second.clone());
        handle.clone().emit(started("g")).await;
        assert_eq!(first.len(), 1);
        assert_eq!(second.events()[0].request_id(), Some("g"));
    }

    #[tokio::test]
    async fn test_log_sink() {
        let mut sink = LogSink;
        sink.call(started("e")).await.unwrap();
    }
}
