use brandmark_core::Snapshot;
use log::warn;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type Listener = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

/// Broadcasts every settled state to all live observers.
///
/// Callbacks run synchronously on the publishing task, outside the registry
/// lock, so a callback may unsubscribe itself. A panicking callback is
/// isolated and logged; the others still run.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<u64, Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> ListenerToken
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, Arc::new(callback));
        ListenerToken(id)
    }

    /// Returns false if the token was already gone.
    pub fn unsubscribe(&self, token: ListenerToken) -> bool {
        self.lock().remove(&token.0).is_some()
    }

    /// Notifies every listener; returns how many returned normally.
    pub fn publish(&self, snapshot: &Snapshot) -> usize {
        let listeners: Vec<(u64, Listener)> = self
            .lock()
            .iter()
            .map(|(id, listener)| (*id, listener.clone()))
            .collect();

        let mut delivered = 0;
        for (id, listener) in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(snapshot))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!("listener {} panicked on version {}", id, snapshot.version),
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn snapshot(version: u64) -> Snapshot {
        Snapshot {
            version,
            ..Snapshot::unresolved()
        }
    }

    #[test]
    fn publish_reaches_every_subscriber() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            registry.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(registry.publish(&snapshot(1)), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let token = registry.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(registry.unsubscribe(token));
        assert!(!registry.unsubscribe(token));
        assert!(registry.is_empty());
        registry.publish(&snapshot(1));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_listener_does_not_starve_the_rest() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.subscribe(|_| panic!("render blew up"));
        let sink = seen.clone();
        registry.subscribe(move |s| sink.lock().unwrap().push(s.version));

        assert_eq!(registry.publish(&snapshot(7)), 1);
        assert_eq!(*seen.lock().unwrap(), vec![7]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn listener_may_unsubscribe_itself() {
        let registry = Arc::new(ListenerRegistry::new());
        let slot: Arc<Mutex<Option<ListenerToken>>> = Arc::new(Mutex::new(None));
        let (reg, own) = (registry.clone(), slot.clone());
        let token = registry.subscribe(move |_| {
            if let Some(token) = own.lock().unwrap().take() {
                reg.unsubscribe(token);
            }
        });
        *slot.lock().unwrap() = Some(token);

        registry.publish(&snapshot(1));
        assert!(registry.is_empty());
    }
}
