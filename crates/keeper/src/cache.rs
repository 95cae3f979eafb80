use crate::listeners::{ListenerRegistry, ListenerToken};
use crate::metadata::MetadataStore;
use crate::state::{Claim, ResolutionState};
use crate::upstream::{asset_locator, ProbeVerdict, TimeoutUpstream, Upstream};
use async_std::task;
use brandmark_core::{AssetHint, BrandError, BrandResult, CacheConfig, PersistedMetadata, Snapshot};
use futures::channel::oneshot;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// What a finished resolver run learned.
#[derive(Debug)]
enum Outcome {
    /// The configuration names no asset.
    NothingConfigured,
    /// No answer this time: configuration unavailable, or the probe never answered.
    Inconclusive(BrandError),
    Found {
        asset_id: String,
        locator: String,
        stamp: u64,
    },
    /// Configured, but definitively absent upstream.
    Missing { asset_id: String },
}

enum Persist {
    Save(PersistedMetadata),
    Erase,
    Keep,
}

enum Ticket {
    Settled(Snapshot),
    Wait(oneshot::Receiver<Snapshot>),
}

struct Shared {
    state: ResolutionState,
    waiters: Vec<oneshot::Sender<Snapshot>>,
    disposed: bool,
}

struct Inner {
    config: CacheConfig,
    upstream: Box<dyn Upstream>,
    store: Box<dyn MetadataStore>,
    listeners: ListenerRegistry,
    shared: Mutex<Shared>,
}

/// The process-wide asset cache.
///
/// Construct it once with [`LogoCache::init`] and hand clones to every
/// observer; all clones share one state, one listener registry and at most
/// one resolver run at a time.
#[derive(Clone)]
pub struct LogoCache {
    inner: Arc<Inner>,
}

impl LogoCache {
    /// Builds the cache, seeding it from persisted metadata when a record exists.
    ///
    /// Every call on `upstream` is bounded by `config.request_timeout_ms`.
    pub fn init<U, S>(config: CacheConfig, upstream: U, store: S) -> Self
    where
        U: Upstream + 'static,
        S: MetadataStore + 'static,
    {
        let state = match store.load() {
            Ok(Some(record)) if !record.asset_id.trim().is_empty() => {
                match asset_locator(
                    &config.asset_base_url,
                    &record.asset_id,
                    &config.cache_bust_param,
                    record.saved_at,
                ) {
                    Ok(locator) => {
                        info!("seeded asset '{}' from persisted metadata", record.asset_id);
                        ResolutionState::seeded(record.asset_id, locator)
                    }
                    Err(e) => {
                        warn!("cannot seed '{}': {}", record.asset_id, e);
                        ResolutionState::new()
                    }
                }
            }
            Ok(_) => ResolutionState::new(),
            Err(e) => {
                warn!("ignoring persisted metadata: {}", e);
                ResolutionState::new()
            }
        };

        // Every run must end, whatever upstream was handed in.
        let upstream = TimeoutUpstream::new(upstream, config.request_timeout());
        Self {
            inner: Arc::new(Inner {
                config,
                upstream: Box::new(upstream),
                store: Box::new(store),
                listeners: ListenerRegistry::new(),
                shared: Mutex::new(Shared {
                    state,
                    waiters: Vec::new(),
                    disposed: false,
                }),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared().state.snapshot()
    }

    pub fn is_in_flight(&self) -> bool {
        self.shared().state.in_flight()
    }

    /// True when a freshly mounted observer should request a resolver run.
    pub fn needs_resolution(&self) -> bool {
        let shared = self.shared();
        !shared.disposed && shared.state.needs_resolution()
    }

    pub fn subscribe<F>(&self, callback: F) -> ListenerToken
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, token: ListenerToken) -> bool {
        self.inner.listeners.unsubscribe(token)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Resolves the configured asset, or joins the run already in flight.
    ///
    /// A cached `NotFound` returns immediately without touching the network
    /// until a hint invalidates it. Never fails: every error ends in a status.
    pub async fn resolve(&self) -> Snapshot {
        match self.enlist() {
            Ticket::Settled(snapshot) => snapshot,
            Ticket::Wait(rx) => self.wait(rx).await,
        }
    }

    /// Starts a background run if nothing has been checked yet (or only the
    /// persisted seed is known) and no run is in flight. Returns whether one
    /// was started.
    pub fn request_resolution(&self) -> bool {
        let epoch = {
            let mut shared = self.shared();
            if shared.disposed || !shared.state.needs_resolution() {
                return false;
            }
            match shared.state.claim() {
                Claim::Owner(epoch) => epoch,
                Claim::Join | Claim::Settled => return false,
            }
        };
        self.spawn_run(epoch);
        true
    }

    /// Folds an externally announced change into the cache.
    ///
    /// A preview is shown immediately without re-probing. A confirmed hint
    /// throws the cached value away and resolves again from the configuration
    /// endpoint; the returned snapshot is that run's result. A hint with
    /// neither an id nor a locator is rejected and changes nothing.
    pub async fn apply_hint(&self, hint: AssetHint) -> BrandResult<Snapshot> {
        if hint.is_empty() {
            warn!(
                "ignoring {} hint without assetId or locator",
                if hint.confirmed { "confirmed" } else { "preview" }
            );
            return Err(BrandError::MalformedEvent(
                "hint carries neither assetId nor locator".to_string(),
            ));
        }
        if self.shared().disposed {
            return Ok(self.snapshot());
        }
        if hint.confirmed {
            Ok(self.confirm().await)
        } else {
            self.preview(hint)
        }
    }

    /// An observer failed to load the asset it was given. Downgrades to
    /// `NotFound` if `version` is still current; returns whether it did.
    pub fn report_load_failure(&self, version: u64) -> bool {
        let (snapshot, waiters) = {
            let mut guard = self.shared();
            let shared = &mut *guard;
            if !shared.state.downgrade(version) {
                debug!("ignoring load failure for stale version {}", version);
                return false;
            }
            (shared.state.snapshot(), std::mem::take(&mut shared.waiters))
        };
        warn!("asset at version {} failed to load, marking it missing", version);
        self.persist(Persist::Erase);
        self.broadcast(snapshot, waiters);
        true
    }

    /// Drops every listener and releases every waiter. Later calls return the
    /// current snapshot without network traffic.
    pub fn dispose(&self) {
        let (snapshot, waiters) = {
            let mut guard = self.shared();
            if guard.disposed {
                return;
            }
            guard.disposed = true;
            (guard.state.snapshot(), std::mem::take(&mut guard.waiters))
        };
        for waiter in waiters {
            let _ = waiter.send(snapshot.clone());
        }
        self.inner.listeners.clear();
        info!("asset cache disposed at version {}", snapshot.version);
    }

    pub fn is_disposed(&self) -> bool {
        self.shared().disposed
    }

    fn enlist(&self) -> Ticket {
        let (tx, rx) = oneshot::channel();
        let owned = {
            let mut shared = self.shared();
            if shared.disposed {
                return Ticket::Settled(shared.state.snapshot());
            }
            match shared.state.claim() {
                Claim::Settled => {
                    debug!("asset known missing, skipping resolution");
                    return Ticket::Settled(shared.state.snapshot());
                }
                Claim::Join => {
                    shared.waiters.push(tx);
                    None
                }
                Claim::Owner(epoch) => {
                    shared.waiters.push(tx);
                    Some(epoch)
                }
            }
        };
        if let Some(epoch) = owned {
            self.spawn_run(epoch);
        }
        Ticket::Wait(rx)
    }

    async fn wait(&self, rx: oneshot::Receiver<Snapshot>) -> Snapshot {
        match async_std::future::timeout(self.inner.config.wait_timeout(), rx).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(_)) => self.snapshot(),
            Err(_) => {
                warn!(
                    "gave up waiting on in-flight resolution after {:?}",
                    self.inner.config.wait_timeout()
                );
                self.snapshot()
            }
        }
    }

    async fn confirm(&self) -> Snapshot {
        let (tx, rx) = oneshot::channel();
        let epoch = {
            let mut shared = self.shared();
            shared.waiters.push(tx);
            shared.state.restart()
        };
        info!("confirmed change announced, re-resolving");
        self.spawn_run(epoch);
        self.wait(rx).await
    }

    fn preview(&self, hint: AssetHint) -> BrandResult<Snapshot> {
        let (asset_id, locator) = self.preview_target(hint)?;
        let (changed, snapshot, waiters) = {
            let mut guard = self.shared();
            let shared = &mut *guard;
            let changed = shared.state.apply_preview(asset_id, locator);
            (
                changed,
                shared.state.snapshot(),
                std::mem::take(&mut shared.waiters),
            )
        };

        if changed {
            info!(
                "previewing {:?} at version {}",
                snapshot.locator, snapshot.version
            );
            self.broadcast(snapshot.clone(), waiters);
        } else {
            debug!("preview matches the cached asset, nothing to publish");
            for waiter in waiters {
                let _ = waiter.send(snapshot.clone());
            }
        }
        Ok(snapshot)
    }

    fn preview_target(&self, hint: AssetHint) -> BrandResult<(String, String)> {
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let config = &self.inner.config;
        match (non_blank(hint.asset_id), non_blank(hint.locator)) {
            (Some(asset_id), Some(locator)) => Ok((asset_id, locator)),
            (Some(asset_id), None) => {
                let locator = asset_locator(
                    &config.asset_base_url,
                    &asset_id,
                    &config.cache_bust_param,
                    now_millis(),
                )?;
                Ok((asset_id, locator))
            }
            (None, Some(locator)) => Ok((id_from_locator(&locator), locator)),
            (None, None) => Err(BrandError::MalformedEvent(
                "preview carries neither assetId nor locator".to_string(),
            )),
        }
    }

    // Runs are detached so that dropping whoever asked (an unmounting
    // observer) never cancels the shared attempt.
    fn spawn_run(&self, epoch: u64) {
        let cache = self.clone();
        task::spawn(async move { cache.run(epoch).await });
    }

    async fn run(&self, epoch: u64) {
        let mut guard = RunGuard {
            cache: self,
            epoch,
            armed: true,
        };
        let outcome = self.attempt().await;
        guard.armed = false;
        self.settle(epoch, outcome);
    }

    async fn attempt(&self) -> Outcome {
        let config = &self.inner.config;
        let remote = match self.inner.upstream.fetch_config().await {
            Ok(remote) => remote,
            Err(e) => return Outcome::Inconclusive(e),
        };
        let asset_id = match remote.configured_id() {
            Some(id) => id.to_string(),
            None => return Outcome::NothingConfigured,
        };

        let stamp = now_millis();
        let locator =
            match asset_locator(&config.asset_base_url, &asset_id, &config.cache_bust_param, stamp)
            {
                Ok(locator) => locator,
                Err(e) => return Outcome::Inconclusive(e),
            };

        let probe = self.inner.upstream.probe(&asset_id).await;
        classify_probe(asset_id, locator, stamp, probe)
    }

    fn settle(&self, epoch: u64, outcome: Outcome) {
        let (snapshot, waiters, persist) = {
            let mut guard = self.shared();
            let shared = &mut *guard;
            if !shared.state.is_current(epoch) {
                debug!("discarding superseded resolution {}: {:?}", epoch, outcome);
                return;
            }

            let persist = match outcome {
                Outcome::Found {
                    asset_id,
                    locator,
                    stamp,
                } => {
                    if shared.state.settle_found(epoch, asset_id.clone(), locator) {
                        info!("asset '{}' found, version {}", asset_id, shared.state.version());
                    } else {
                        debug!("asset '{}' re-confirmed", asset_id);
                    }
                    Persist::Save(PersistedMetadata {
                        asset_id,
                        saved_at: stamp,
                    })
                }
                Outcome::Missing { asset_id } => {
                    shared.state.settle_missing(epoch);
                    info!("asset '{}' missing upstream, not probing again until invalidated", asset_id);
                    Persist::Erase
                }
                Outcome::NothingConfigured => {
                    shared.state.settle_unresolved(epoch);
                    info!("no asset configured");
                    Persist::Erase
                }
                Outcome::Inconclusive(e) => {
                    shared.state.settle_unresolved(epoch);
                    warn!("asset resolution inconclusive: {}", e);
                    Persist::Keep
                }
            };
            (
                shared.state.snapshot(),
                std::mem::take(&mut shared.waiters),
                persist,
            )
        };

        self.persist(persist);
        self.broadcast(snapshot, waiters);
    }

    fn persist(&self, persist: Persist) {
        let result = match persist {
            Persist::Save(record) => self.inner.store.save(&record),
            Persist::Erase => self.inner.store.erase(),
            Persist::Keep => Ok(()),
        };
        if let Err(e) = result {
            warn!("metadata store: {}", e);
        }
    }

    fn broadcast(&self, snapshot: Snapshot, waiters: Vec<oneshot::Sender<Snapshot>>) {
        self.inner.listeners.publish(&snapshot);
        for waiter in waiters {
            let _ = waiter.send(snapshot.clone());
        }
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.inner.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles a run as inconclusive if it unwinds before reaching `settle`.
struct RunGuard<'a> {
    cache: &'a LogoCache,
    epoch: u64,
    armed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.settle(
                self.epoch,
                Outcome::Inconclusive(BrandError::transport("resolver run aborted")),
            );
        }
    }
}

/// Turns a probe result into an outcome.
///
/// Only a definitive "absent" answer yields `Missing`, which sticks until a
/// hint invalidates it. A probe that never produced an answer (timeout,
/// transport failure, 5xx) is `Inconclusive` and leaves the asset unresolved,
/// keeping "never checked" apart from "checked, absent".
fn classify_probe(
    asset_id: String,
    locator: String,
    stamp: u64,
    probe: BrandResult<ProbeVerdict>,
) -> Outcome {
    match probe {
        Ok(ProbeVerdict::Present) => Outcome::Found {
            asset_id,
            locator,
            stamp,
        },
        Ok(ProbeVerdict::Absent) | Err(BrandError::AssetNotFound(_)) => Outcome::Missing { asset_id },
        Err(e) => Outcome::Inconclusive(e),
    }
}

fn id_from_locator(locator: &str) -> String {
    surf::Url::parse(locator)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|segment| !segment.is_empty())
        .unwrap_or_else(|| locator.split('?').next().unwrap_or(locator).to_string())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl std::fmt::Debug for LogoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared();
        f.debug_struct("LogoCache")
            .field("status", &shared.state.status())
            .field("version", &shared.state.version())
            .field("in_flight", &shared.state.in_flight())
            .field("disposed", &shared.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandmark_core::Status;

    #[test]
    fn transport_failure_is_not_remembered_as_missing() {
        let outcome = classify_probe(
            "a".into(),
            "l".into(),
            1,
            Err(BrandError::transport("connection reset")),
        );
        assert!(matches!(outcome, Outcome::Inconclusive(BrandError::Transport(_))));

        let outcome = classify_probe("a".into(), "l".into(), 1, Err(BrandError::Timeout));
        assert!(matches!(outcome, Outcome::Inconclusive(BrandError::Timeout)));
    }

    #[test]
    fn definitive_absence_is_missing() {
        let outcome = classify_probe("a".into(), "l".into(), 1, Ok(ProbeVerdict::Absent));
        assert!(matches!(outcome, Outcome::Missing { .. }));
        let outcome = classify_probe("a".into(), "l".into(), 1, Ok(ProbeVerdict::Present));
        assert!(matches!(outcome, Outcome::Found { .. }));
    }

    #[test]
    fn preview_id_comes_from_the_last_path_segment() {
        assert_eq!(id_from_locator("http://h/uploads/new-logo.svg?v=3"), "new-logo.svg");
        assert_eq!(id_from_locator("X"), "X");
    }

    #[test]
    fn status_of_fresh_cache_is_unresolved() {
        let cache = LogoCache::init(
            CacheConfig::default(),
            crate::stub::StubUpstream::new(),
            crate::metadata::MemoryMetadataStore::new(),
        );
        assert_eq!(cache.snapshot().status, Status::Unresolved);
        assert!(cache.needs_resolution());
    }
}
