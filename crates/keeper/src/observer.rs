use crate::cache::LogoCache;
use crate::listeners::ListenerToken;
use brandmark_core::{Snapshot, Status};
use futures::channel::mpsc;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Where a mount point is in its own lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing known and nothing in flight.
    Unchecked,
    /// Waiting on a resolver run.
    Checking,
    /// Showing a seeded or previewed asset that is not verified yet.
    CachedPreview,
    Found,
    NotFound,
}

/// What a mount point should draw right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendering {
    /// The deterministic placeholder used for every non-`Found` status.
    Fallback,
    Asset { locator: String, version: u64 },
}

/// A read-only subscriber bound to one mount point.
///
/// Mounting subscribes to the cache and, when nothing is known yet, asks it
/// to resolve. Unmounting (or dropping) removes the subscription but never
/// cancels a resolution other observers are waiting on.
pub struct Observer {
    cache: LogoCache,
    token: Option<ListenerToken>,
    view: Arc<Mutex<Snapshot>>,
    updates: mpsc::UnboundedReceiver<Snapshot>,
}

impl Observer {
    pub fn mount(cache: &LogoCache) -> Self {
        let (tx, updates) = mpsc::unbounded();
        let view = Arc::new(Mutex::new(Snapshot::unresolved()));

        // Subscribe before reading, so a publish landing in between is not lost.
        let sink = view.clone();
        let token = cache.subscribe(move |snapshot| {
            let mut current = lock(&sink);
            if snapshot.version >= current.version {
                *current = snapshot.clone();
            }
            drop(current);
            let _ = tx.unbounded_send(snapshot.clone());
        });

        let observer = Self {
            cache: cache.clone(),
            token: Some(token),
            view,
            updates,
        };
        observer.refresh();
        cache.request_resolution();
        observer
    }

    // The run may have settled without its publish reaching us yet.
    fn refresh(&self) {
        let current = self.cache.snapshot();
        if current.status == Status::Resolving {
            return;
        }
        let mut seen = lock(&self.view);
        if current.version >= seen.version {
            *seen = current;
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        lock(&self.view).clone()
    }

    pub fn phase(&self) -> Phase {
        let view = self.snapshot();
        match view.status {
            Status::Found if view.verified => Phase::Found,
            Status::Found => Phase::CachedPreview,
            Status::NotFound => Phase::NotFound,
            Status::Unresolved | Status::Resolving => {
                if self.cache.is_in_flight() {
                    Phase::Checking
                } else {
                    Phase::Unchecked
                }
            }
        }
    }

    pub fn render(&self) -> Rendering {
        let view = self.snapshot();
        match (view.status, view.locator) {
            (Status::Found, Some(locator)) => Rendering::Asset {
                locator,
                version: view.version,
            },
            _ => Rendering::Fallback,
        }
    }

    /// Next snapshot published by the cache, or `None` once unmounted or disposed.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        if self.token.is_none() {
            return None;
        }
        self.updates.next().await
    }

    /// Waits until this observer has something terminal to show: the cache
    /// finished a run, or `limit` passed. Returns the rendering either way.
    pub async fn settle(&mut self, limit: Duration) -> Rendering {
        let deadline = async_std::future::timeout(limit, async {
            while self.cache.is_in_flight() {
                if self.changed().await.is_none() {
                    break;
                }
            }
        });
        let _ = deadline.await;
        self.refresh();
        self.render()
    }

    /// The asset failed to materialize at render time. Pushes the downgrade
    /// through the cache so sibling observers converge too.
    pub fn report_load_failure(&self) -> bool {
        let view = self.snapshot();
        view.status == Status::Found && self.cache.report_load_failure(view.version)
    }

    pub fn is_mounted(&self) -> bool {
        self.token.is_some()
    }

    pub fn unmount(&mut self) {
        if let Some(token) = self.token.take() {
            self.cache.unsubscribe(token);
            self.updates.close();
        }
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn lock(view: &Mutex<Snapshot>) -> MutexGuard<'_, Snapshot> {
    view.lock().unwrap_or_else(PoisonError::into_inner)
}
