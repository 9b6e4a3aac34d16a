//! Publish/subscribe fan-out of session events.
//!
//! Handlers run synchronously, in registration order, on the task that
//! published the event. A handler that fails or panics is logged and skipped;
//! the remaining handlers still run and the publisher never sees the failure.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::types::{EventKind, SessionEvent};

/// Error a handler may report.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Event handler type.
pub type EventHandler = Arc<dyn Fn(&SessionEvent) -> Result<(), ObserverError> + Send + Sync>;

/// Identifies a registration so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    /// `None` receives every event.
    kind: Option<EventKind>,
    handler: EventHandler,
}

#[derive(Default)]
pub struct EventDispatcher {
    next_id: AtomicU64,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one class of events.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Register a handler for every event.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, kind: Option<EventKind>, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription { id, kind, handler });
        id
    }

    /// Remove a registration. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver `event` to every matching handler. Returns how many handlers
    /// completed without error.
    pub fn dispatch(&self, event: &SessionEvent) -> usize {
        let kind = event.kind();
        // Handlers may (un)subscribe, so they run without the lock held.
        let handlers: Vec<(SubscriptionId, EventHandler)> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.kind.map_or(true, |k| k == kind))
            .map(|s| (s.id, s.handler.clone()))
            .collect();

        let mut delivered = 0;
        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    log::error!("subscriber {:?} failed on {:?} event: {}", id, kind, err)
                }
                Err(_) => log::error!("subscriber {:?} panicked on {:?} event", id, kind),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> EventHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_for_handlers = seen.clone();
        let make = move |label: &str| -> EventHandler {
            let seen = seen_for_handlers.clone();
            let label = label.to_string();
            Arc::new(move |_event: &SessionEvent| {
                seen.lock().unwrap().push(label.clone());
                Ok(())
            })
        };
        (seen, make)
    }

    #[test]
    fn test_delivers_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let (seen, make) = recorder();
        for label in ["a", "b", "c"] {
            let handler = make(label);
            dispatcher.subscribe(EventKind::Ready, move |e| handler(e));
        }

        assert_eq!(dispatcher.dispatch(&SessionEvent::Ready), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_filters_by_kind() {
        let dispatcher = EventDispatcher::new();
        let (seen, make) = recorder();
        let ready = make("ready");
        let all = make("all");
        dispatcher.subscribe(EventKind::Ready, move |e| ready(e));
        dispatcher.subscribe_all(move |e| all(e));

        dispatcher.dispatch(&SessionEvent::Authenticated);
        assert_eq!(*seen.lock().unwrap(), vec!["all"]);
    }

    #[test]
    fn test_failing_subscribers_do_not_stop_delivery() {
        let dispatcher = EventDispatcher::new();
        let (seen, make) = recorder();
        dispatcher.subscribe(EventKind::Error, |_| Err("boom".into()));
        dispatcher.subscribe(EventKind::Error, |_| panic!("observer bug"));
        let last = make("last");
        dispatcher.subscribe(EventKind::Error, move |e| last(e));

        let delivered = dispatcher.dispatch(&SessionEvent::Error {
            message: "x".into(),
        });
        assert_eq!(delivered, 1);
        assert_eq!(*seen.lock().unwrap(), vec!["last"]);
    }

    #[test]
    fn test_unsubscribe_removes_handler() {
        let dispatcher = EventDispatcher::new();
        let (seen, make) = recorder();
        let handler = make("gone");
        let id = dispatcher.subscribe(EventKind::Ready, move |e| handler(e));

        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));
        dispatcher.dispatch(&SessionEvent::Ready);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(dispatcher.subscriber_count(), 0);
    }
}
