//! Named publish/subscribe bus for build lifecycle events.
//!
//! Handlers registered with [`EventBus::subscribe`] run inline on the
//! publisher's task, in registration order. Every event is also forwarded to a
//! `tokio::sync::broadcast` stream for async consumers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use build_core::{BuildError, BuildEvent, EventName};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, oneshot};

/// Callback invoked for every matching event.
pub type EventHandler = Arc<dyn Fn(&BuildEvent) + Send + Sync>;

type HandlerTable = HashMap<EventName, Vec<(u64, EventHandler)>>;

struct BusInner {
    handlers: RwLock<HandlerTable>,
    next_id: AtomicU64,
    sender: broadcast::Sender<BuildEvent>,
}

/// Injectable event bus. Cloning shares the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus whose async stream buffers `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    /// Dispatch an event to every current subscriber of its name.
    ///
    /// Handlers may subscribe, unsubscribe or publish from inside the callback.
    pub fn publish(&self, event: BuildEvent) {
        let name = event.name();
        let handlers: Vec<EventHandler> = self
            .inner
            .handlers
            .read()
            .get(&name)
            .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        tracing::debug!(event = %name, handlers = handlers.len(), "{}", event.description());

        for handler in handlers {
            handler(&event);
        }

        // No stream receivers is fine.
        let _ = self.inner.sender.send(event);
    }

    /// Register a handler for one event name.
    ///
    /// The same closure registered twice runs twice.
    pub fn subscribe<F>(&self, name: EventName, handler: F) -> Subscription
    where
        F: Fn(&BuildEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .entry(name)
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            bus: Arc::downgrade(&self.inner),
            name,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Receive every published event asynchronously.
    pub fn stream(&self) -> broadcast::Receiver<BuildEvent> {
        self.inner.sender.subscribe()
    }

    /// Number of handlers currently registered for a name.
    pub fn subscriber_count(&self, name: EventName) -> usize {
        self.inner
            .handlers
            .read()
            .get(&name)
            .map_or(0, |entries| entries.len())
    }

    /// Wait for the next `name` event scoped to `correlation_id`.
    ///
    /// The listener is registered when this is called, not when the returned
    /// future is first polled, so an event published in between is not missed.
    /// The listener is removed on success, on timeout and when the future is
    /// dropped.
    pub fn wait_for(
        &self,
        name: EventName,
        correlation_id: impl Into<String>,
        timeout: Duration,
    ) -> impl Future<Output = Result<BuildEvent, BuildError>> + Send + 'static {
        let correlation_id = correlation_id.into();
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));

        let subscription = self.subscribe(name, move |event| {
            if !event.matches_correlation(&correlation_id) {
                return;
            }
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(event.clone());
            }
        });
        let guard = UnsubscribeOnDrop(subscription);

        async move {
            let outcome = tokio::time::timeout(timeout, rx).await;
            drop(guard);
            match outcome {
                Ok(Ok(event)) => Ok(event),
                Ok(Err(_)) => Err(BuildError::Cancelled),
                Err(_) => Err(BuildError::Timeout(timeout.as_millis() as u64)),
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handler_count: usize = self.inner.handlers.read().values().map(Vec::len).sum();
        f.debug_struct("EventBus")
            .field("handler_count", &handler_count)
            .field("stream_receivers", &self.inner.sender.receiver_count())
            .finish()
    }
}

/// Disposer returned by [`EventBus::subscribe`].
///
/// Dropping it leaves the handler registered; call [`Subscription::unsubscribe`].
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    bus: Weak<BusInner>,
    name: EventName,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the handler. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            let mut handlers = bus.handlers.write();
            if let Some(entries) = handlers.get_mut(&self.name) {
                entries.retain(|(id, _)| *id != self.id);
                if entries.is_empty() {
                    handlers.remove(&self.name);
                }
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn event_name(&self) -> EventName {
        self.name
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

struct UnsubscribeOnDrop(Subscription);

impl Drop for UnsubscribeOnDrop {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}
