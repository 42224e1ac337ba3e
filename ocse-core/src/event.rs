use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};

type Handler =
    Arc<dyn Fn(Arc<ResourceEvent>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Default maximum concurrently running handlers.
const DEFAULT_MAX_CONCURRENCY: usize = 1024;

/// What happened to a resource.
///
/// The subscription engine maps these onto notification event types; the
/// announcement manager and statistics writer consume them directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
    Expired,
    /// A container was retrieved while holding no content instance.
    BareRetrieve,
}

/// A committed resource change.
///
/// Events are emitted strictly after the storage transaction commits; the
/// snapshot is the representation at commit time, so consumers never observe
/// phantom state.
#[derive(Clone, Debug)]
pub struct ResourceEvent {
    pub kind: EventKind,
    /// Resource the event is about.
    pub ri: String,
    /// Its parent at commit time.
    pub pi: String,
    /// Resource type code.
    pub ty: u32,
    /// Structured name at commit time.
    pub srn: String,
    /// Wrapped representation (`{"m2m:...": {...}}`) at commit time.
    pub snapshot: Value,
    /// Attribute short-names changed by an update.
    pub changed: Vec<String>,
    /// Originator of the request that caused the event.
    pub originator: String,
}

/// In-process pub/sub bus for [`ResourceEvent`]s with backpressure.
///
/// Handlers run as spawned tasks; a semaphore bounds how many execute
/// concurrently, so a slow notification target cannot pile up unbounded work.
/// The bus is `Clone` and shared between the dispatcher and the workers.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Handler>>>,
    semaphore: Arc<Semaphore>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_concurrency(DEFAULT_MAX_CONCURRENCY)
    }

    pub fn with_concurrency(max_concurrent: usize) -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Register a handler called for every emitted event.
    pub async fn subscribe<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<ResourceEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event| Box::pin(handler(event)));
        self.handlers.write().await.push(handler);
    }

    /// Emit an event, spawning all handlers.
    ///
    /// Blocks only while waiting for a concurrency slot; returns once every
    /// handler has been spawned.
    pub async fn emit(&self, event: ResourceEvent) {
        let event = Arc::new(event);
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            let h = handler.clone();
            let e = event.clone();
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("event bus semaphore closed");
            tokio::spawn(async move {
                h(e).await;
                drop(permit);
            });
        }
    }

    /// Emit an event and wait for all handlers to complete.
    pub async fn emit_and_wait(&self, event: ResourceEvent) {
        let event = Arc::new(event);
        let handlers = self.handlers.read().await;
        let mut tasks = Vec::new();
        for handler in handlers.iter() {
            let h = handler.clone();
            let e = event.clone();
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("event bus semaphore closed");
            tasks.push(tokio::spawn(async move {
                h(e).await;
                drop(permit);
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn event(kind: EventKind, ri: &str) -> ResourceEvent {
        ResourceEvent {
            kind,
            ri: ri.to_string(),
            pi: "parent".to_string(),
            ty: 3,
            srn: format!("cse-in/{ri}"),
            snapshot: serde_json::json!({}),
            changed: Vec::new(),
            originator: "CAdmin".to_string(),
        }
    }

    #[tokio::test]
    async fn emit_reaches_all_handlers() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = counter.clone();
            bus.subscribe(move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        }
        bus.emit_and_wait(event(EventKind::Created, "x")).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn handlers_see_event_fields() {
        let bus = EventBus::new();
        let seen = Arc::new(tokio::sync::Mutex::new(None));
        let s = seen.clone();
        bus.subscribe(move |e: Arc<ResourceEvent>| {
            let s = s.clone();
            async move {
                *s.lock().await = Some((e.kind, e.ri.clone()));
            }
        })
        .await;
        bus.emit_and_wait(event(EventKind::Deleted, "gone")).await;
        assert_eq!(
            seen.lock().await.clone(),
            Some((EventKind::Deleted, "gone".to_string()))
        );
    }

    #[tokio::test]
    async fn backpressure_bounds_concurrency() {
        let bus = EventBus::with_concurrency(2);
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let a = active.clone();
        let m = max_seen.clone();
        bus.subscribe(move |_| {
            let active = a.clone();
            let max_seen = m.clone();
            async move {
                let current = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;
        for i in 0..10 {
            bus.emit(event(EventKind::Updated, &format!("r{i}"))).await;
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_poison_bus() {
        let bus = EventBus::new();
        bus.subscribe(|_| async { panic!("boom") }).await;
        bus.emit_and_wait(event(EventKind::Created, "x")).await;

        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        bus.subscribe(move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;
        bus.emit_and_wait(event(EventKind::Created, "y")).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
