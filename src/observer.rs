//! storage events and the observers that receive them.
//!
//! Observers are notified after a write succeeded. Notification is best
//! effort: an observer that fails or panics is logged and skipped, and the
//! write that triggered it still succeeds.

use std::error::Error;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageEventType {
    EntitySaved,
    EntityUpdated,
    EntityDeleted,
    BatchOperation,
}

impl StorageEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageEventType::EntitySaved => "ENTITY_SAVED",
            StorageEventType::EntityUpdated => "ENTITY_UPDATED",
            StorageEventType::EntityDeleted => "ENTITY_DELETED",
            StorageEventType::BatchOperation => "BATCH_OPERATION",
        }
    }
}

impl fmt::Display for StorageEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change made through a repository.
///
/// `payload` is the wire document for saves and `{"_id": key}` for deletes;
/// batch events carry the counts of the batch.
#[derive(Debug, Clone, Serialize)]
pub struct StorageEvent {
    pub event_type: StorageEventType,
    pub entity_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl StorageEvent {
    pub fn new(event_type: StorageEventType, entity_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type,
            entity_type: entity_type.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

pub type ObserverResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Receives storage events.
pub trait StorageObserver: Send + Sync {
    fn on_storage_event(&self, event: &StorageEvent) -> ObserverResult;
}

impl<F> StorageObserver for F
where
    F: Fn(&StorageEvent) -> ObserverResult + Send + Sync,
{
    fn on_storage_event(&self, event: &StorageEvent) -> ObserverResult {
        self(event)
    }
}

/// The observer list shared by an engine and its repositories.
///
/// Copy-on-write: dispatch iterates a snapshot, so observers added or
/// removed while an event is being delivered only see later events.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Arc<RwLock<Arc<Vec<Arc<dyn StorageObserver>>>>>,
}

fn same_observer(a: &Arc<dyn StorageObserver>, b: &Arc<dyn StorageObserver>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// add an observer; registering the same one twice delivers events twice
    pub fn register(&self, observer: Arc<dyn StorageObserver>) {
        let mut observers = self.observers.write();
        let mut next = Vec::clone(&observers);
        next.push(observer);
        *observers = Arc::new(next);
    }

    /// remove the first registration of `observer`, returning whether it was found
    pub fn remove(&self, observer: &Arc<dyn StorageObserver>) -> bool {
        let mut observers = self.observers.write();
        let Some(position) = observers.iter().position(|o| same_observer(o, observer)) else {
            return false;
        };
        let mut next = Vec::clone(&observers);
        next.remove(position);
        *observers = Arc::new(next);
        true
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// deliver `event` to every observer registered right now
    pub fn notify(&self, event: &StorageEvent) {
        let snapshot = Arc::clone(&self.observers.read());
        for observer in snapshot.iter() {
            match catch_unwind(AssertUnwindSafe(|| observer.on_storage_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    event = %event.event_type,
                    entity = %event.entity_type,
                    error = %e,
                    "storage observer failed"
                ),
                Err(_) => warn!(
                    event = %event.event_type,
                    entity = %event.entity_type,
                    "storage observer panicked"
                ),
            }
        }
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry").field("observers", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Counting {
        seen: AtomicUsize,
    }

    impl StorageObserver for Counting {
        fn on_storage_event(&self, _event: &StorageEvent) -> ObserverResult {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn event() -> StorageEvent {
        StorageEvent::new(StorageEventType::EntitySaved, "Player", json!({"_id": "a"}))
    }

    #[test]
    fn test_duplicate_registration_delivers_twice() {
        let registry = ObserverRegistry::new();
        let counting = Arc::new(Counting::default());
        let observer: Arc<dyn StorageObserver> = counting.clone();

        registry.register(observer.clone());
        registry.register(observer.clone());
        registry.notify(&event());
        assert_eq!(counting.seen.load(Ordering::SeqCst), 2);

        assert!(registry.remove(&observer));
        assert_eq!(registry.len(), 1);
        registry.notify(&event());
        assert_eq!(counting.seen.load(Ordering::SeqCst), 3);

        assert!(registry.remove(&observer));
        assert!(!registry.remove(&observer));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failing_observers_do_not_stop_delivery() {
        let registry = ObserverRegistry::new();
        let counting = Arc::new(Counting::default());

        registry.register(Arc::new(|_: &StorageEvent| -> ObserverResult { Err("boom".into()) }));
        registry.register(Arc::new(|_: &StorageEvent| -> ObserverResult { panic!("observer bug") }));
        registry.register(counting.clone());

        registry.notify(&event());
        assert_eq!(counting.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_removal_during_dispatch_keeps_snapshot() {
        let registry = ObserverRegistry::new();
        let counting = Arc::new(Counting::default());
        let target: Arc<dyn StorageObserver> = counting.clone();

        let handle = registry.clone();
        let removed = target.clone();
        registry.register(Arc::new(move |_: &StorageEvent| -> ObserverResult {
            handle.remove(&removed);
            Ok(())
        }));
        registry.register(target);

        registry.notify(&event());
        assert_eq!(counting.seen.load(Ordering::SeqCst), 1);

        registry.notify(&event());
        assert_eq!(counting.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_serializes_type_name() {
        let value = serde_json::to_value(event()).unwrap();
        assert_eq!(value["event_type"], "ENTITY_SAVED");
        assert_eq!(value["entity_type"], "Player");
    }
}
