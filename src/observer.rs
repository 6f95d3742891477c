use crate::message::Message;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Subscriber to completed inbound messages or outbound `send` calls.
///
/// Implemented for plain closures, so `registry.subscribe(Arc::new(|m| ...))`
///  works without a named type.
pub trait MessageObserver: Send + Sync {
    fn on_message(&self, message: &Message);
}

impl<F: Fn(&Message) + Send + Sync> MessageObserver for F {
    fn on_message(&self, message: &Message) {
        self(message)
    }
}

/// Handle for unsubscribing.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct ObserverId(u64);

/// Subscriber list notified in registration order. A panicking subscriber is
///  isolated and logged; the remaining subscribers still run, and the
///  transport's own state is never left inconsistent by a subscriber.
pub struct ObserverRegistry {
    observers: Mutex<Vec<(ObserverId, Arc<dyn MessageObserver>)>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> ObserverRegistry {
        ObserverRegistry {
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn MessageObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::AcqRel));
        self.observers
            .lock()
            .expect("observer registry lock poisoned")
            .push((id, observer));
        id
    }

    /// Returns false if the id was not (or no longer) subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock().expect("observer registry lock poisoned");
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    pub fn notify(&self, message: &Message) {
        // snapshot outside the lock so a subscriber can (un)subscribe from
        // within its callback
        let observers: Vec<Arc<dyn MessageObserver>> = self
            .observers
            .lock()
            .expect("observer registry lock poisoned")
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer.on_message(message))).is_err() {
                warn!("message observer panicked, continuing with the remaining observers");
            }
        }
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
