use brandmark_core::{Snapshot, Status};

/// Where the currently held value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Nothing has been checked since start or since the last invalidation.
    Unchecked,
    /// Optimistically restored from persisted metadata, not yet verified.
    Seeded,
    /// Set by a preview hint, not yet verified.
    Preview,
    /// Settled by a completed resolver run.
    Checked,
}

/// Result of asking for the right to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller owns the run identified by this epoch and must settle it.
    Owner(u64),
    /// Another run is in flight; wait for it.
    Join,
    /// A definitive negative is cached; nothing to do until invalidated.
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Shown {
    asset_id: String,
    locator: String,
}

/// The single mutable record describing the known asset.
///
/// Invariants kept by every transition:
/// - `Found` holds both an id and a locator, every other status holds neither.
/// - `version` never decreases and only moves when the visible value changes.
/// - only the run whose epoch is current may settle the state.
#[derive(Debug, Clone)]
pub struct ResolutionState {
    asset_id: Option<String>,
    locator: Option<String>,
    status: Status,
    version: u64,
    in_flight: bool,
    origin: Origin,
    epoch: u64,
    // Last value observers were told about; survives invalidation so that a
    // re-resolution landing on the same asset does not count as a change.
    shown: Option<Shown>,
}

impl Default for ResolutionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionState {
    pub fn new() -> Self {
        Self {
            asset_id: None,
            locator: None,
            status: Status::Unresolved,
            version: 0,
            in_flight: false,
            origin: Origin::Unchecked,
            epoch: 0,
            shown: None,
        }
    }

    /// State restored from a previous run: already `Found`, pending verification.
    pub fn seeded(asset_id: String, locator: String) -> Self {
        Self {
            asset_id: Some(asset_id.clone()),
            locator: Some(locator.clone()),
            status: Status::Found,
            origin: Origin::Seeded,
            shown: Some(Shown { asset_id, locator }),
            ..Self::new()
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn asset_id(&self) -> Option<&str> {
        self.asset_id.as_deref()
    }

    pub fn locator(&self) -> Option<&str> {
        self.locator.as_deref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            asset_id: self.asset_id.clone(),
            locator: self.locator.clone(),
            version: self.version,
            verified: self.origin == Origin::Checked,
        }
    }

    /// Whether a newly mounted observer should kick off a resolver run.
    pub fn needs_resolution(&self) -> bool {
        !self.in_flight
            && self.status != Status::NotFound
            && matches!(self.origin, Origin::Unchecked | Origin::Seeded)
    }

    pub fn claim(&mut self) -> Claim {
        if self.status == Status::NotFound {
            return Claim::Settled;
        }
        if self.in_flight {
            return Claim::Join;
        }
        self.in_flight = true;
        self.epoch += 1;
        if self.status == Status::Unresolved {
            self.status = Status::Resolving;
        }
        Claim::Owner(self.epoch)
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.in_flight && self.epoch == epoch
    }

    /// Drops the cached value and any claim on it. A run still in flight
    /// keeps going but can no longer settle.
    pub fn invalidate(&mut self) {
        self.asset_id = None;
        self.locator = None;
        self.status = Status::Unresolved;
        self.in_flight = false;
        self.origin = Origin::Unchecked;
        self.epoch += 1;
    }

    /// Invalidates and claims a fresh run in one step; returns its epoch.
    pub fn restart(&mut self) -> u64 {
        self.invalidate();
        self.in_flight = true;
        self.epoch += 1;
        self.status = Status::Resolving;
        self.epoch
    }

    /// The probe confirmed the asset. Returns whether `version` moved.
    ///
    /// Re-confirming the asset already shown keeps its locator, so repeated
    /// checks do not churn the cache-busting suffix.
    pub fn settle_found(&mut self, epoch: u64, asset_id: String, locator: String) -> bool {
        if !self.is_current(epoch) {
            return false;
        }
        let unchanged = self.shown.as_ref().map_or(false, |s| {
            s.asset_id == asset_id && strip_query(&s.locator) == strip_query(&locator)
        });
        let locator = match (&self.shown, unchanged) {
            (Some(shown), true) => shown.locator.clone(),
            _ => locator,
        };
        self.show(asset_id, locator, !unchanged);
        self.finish();
        !unchanged
    }

    /// The probe gave a definitive "absent": sticky until invalidated.
    pub fn settle_missing(&mut self, epoch: u64) -> bool {
        if !self.is_current(epoch) {
            return false;
        }
        self.mark_missing();
        self.finish();
        true
    }

    /// Nothing configured, or the attempt could not complete.
    pub fn settle_unresolved(&mut self, epoch: u64) -> bool {
        if !self.is_current(epoch) {
            return false;
        }
        self.asset_id = None;
        self.locator = None;
        self.status = Status::Unresolved;
        let changed = self.shown.take().is_some();
        if changed {
            self.version += 1;
        }
        self.finish();
        changed
    }

    /// Optimistic update. Supersedes any run in flight. Returns whether
    /// `version` moved; an identical preview is a no-op.
    pub fn apply_preview(&mut self, asset_id: String, locator: String) -> bool {
        self.in_flight = false;
        self.epoch += 1;
        self.origin = Origin::Preview;
        let unchanged = self
            .shown
            .as_ref()
            .map_or(false, |s| s.asset_id == asset_id && s.locator == locator)
            && self.status == Status::Found;
        self.show(asset_id, locator, !unchanged);
        !unchanged
    }

    /// The asset at `version` failed to load after all. Stale reports are
    /// ignored so a late failure cannot knock out a newer asset.
    pub fn downgrade(&mut self, version: u64) -> bool {
        if self.status != Status::Found || self.version != version {
            return false;
        }
        self.in_flight = false;
        self.epoch += 1;
        self.mark_missing();
        self.origin = Origin::Checked;
        true
    }

    fn show(&mut self, asset_id: String, locator: String, bump: bool) {
        self.asset_id = Some(asset_id.clone());
        self.locator = Some(locator.clone());
        self.status = Status::Found;
        self.shown = Some(Shown { asset_id, locator });
        if bump {
            self.version += 1;
        }
    }

    fn mark_missing(&mut self) {
        self.asset_id = None;
        self.locator = None;
        self.status = Status::NotFound;
        self.shown = None;
        self.version += 1;
    }

    fn finish(&mut self) {
        self.in_flight = false;
        self.origin = Origin::Checked;
    }
}

fn strip_query(locator: &str) -> &str {
    locator
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or(locator)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(state: &mut ResolutionState) -> u64 {
        match state.claim() {
            Claim::Owner(epoch) => epoch,
            other => panic!("expected ownership, got {:?}", other),
        }
    }

    #[test]
    fn second_claim_joins_the_first() {
        let mut state = ResolutionState::new();
        let epoch = owner(&mut state);
        assert_eq!(state.status(), Status::Resolving);
        assert_eq!(state.claim(), Claim::Join);
        assert!(state.is_current(epoch));
    }

    #[test]
    fn found_bumps_version_once_per_distinct_id() {
        let mut state = ResolutionState::new();
        let epoch = owner(&mut state);
        assert!(state.settle_found(epoch, "brand.png".into(), "http://h/logo/brand.png?t=1".into()));
        assert_eq!(state.version(), 1);

        let epoch = owner(&mut state);
        assert_eq!(state.status(), Status::Found);
        assert!(!state.settle_found(epoch, "brand.png".into(), "http://h/logo/brand.png?t=2".into()));
        assert_eq!(state.version(), 1);
        assert_eq!(state.locator(), Some("http://h/logo/brand.png?t=1"));
        assert_eq!(state.origin(), Origin::Checked);
        assert!(!state.in_flight());
    }

    #[test]
    fn missing_clears_everything_and_sticks() {
        let mut state = ResolutionState::seeded("old.png".into(), "http://h/logo/old.png?t=1".into());
        let epoch = owner(&mut state);
        assert_eq!(state.status(), Status::Found);
        assert!(state.settle_missing(epoch));
        assert_eq!(state.status(), Status::NotFound);
        assert_eq!(state.asset_id(), None);
        assert_eq!(state.locator(), None);
        assert_eq!(state.version(), 1);
        assert_eq!(state.claim(), Claim::Settled);
        assert!(!state.needs_resolution());
    }

    #[test]
    fn unresolved_only_bumps_when_something_was_shown() {
        let mut state = ResolutionState::new();
        let epoch = owner(&mut state);
        assert!(!state.settle_unresolved(epoch));
        assert_eq!(state.version(), 0);
        assert_eq!(state.status(), Status::Unresolved);
        assert!(!state.needs_resolution());

        let mut seeded = ResolutionState::seeded("a.png".into(), "http://h/logo/a.png?t=1".into());
        let epoch = owner(&mut seeded);
        assert!(seeded.settle_unresolved(epoch));
        assert_eq!(seeded.version(), 1);
        assert_eq!(seeded.asset_id(), None);
    }

    #[test]
    fn invalidated_run_cannot_settle() {
        let mut state = ResolutionState::new();
        let stale = owner(&mut state);
        state.invalidate();
        let fresh = owner(&mut state);
        assert!(!state.settle_found(stale, "x".into(), "http://h/logo/x".into()));
        assert_eq!(state.status(), Status::Resolving);
        assert!(state.settle_found(fresh, "y".into(), "http://h/logo/y".into()));
        assert_eq!(state.asset_id(), Some("y"));
    }

    #[test]
    fn identical_preview_is_a_no_op() {
        let mut state = ResolutionState::new();
        assert!(state.apply_preview("x".into(), "blob:x".into()));
        assert!(!state.apply_preview("x".into(), "blob:x".into()));
        assert_eq!(state.version(), 1);
        assert!(state.apply_preview("x".into(), "blob:x2".into()));
        assert_eq!(state.version(), 2);
        assert_eq!(state.origin(), Origin::Preview);
        assert!(!state.snapshot().verified);
    }

    #[test]
    fn preview_supersedes_run_in_flight() {
        let mut state = ResolutionState::new();
        let epoch = owner(&mut state);
        state.apply_preview("x".into(), "blob:x".into());
        assert!(!state.in_flight());
        assert!(!state.settle_missing(epoch));
        assert_eq!(state.status(), Status::Found);
    }

    #[test]
    fn reconfirming_a_transient_locator_replaces_it() {
        let mut state = ResolutionState::new();
        state.apply_preview("brand.png".into(), "http://upload/tmp/brand.png".into());
        state.invalidate();
        let epoch = owner(&mut state);
        assert!(state.settle_found(epoch, "brand.png".into(), "http://h/logo/brand.png?t=9".into()));
        assert_eq!(state.locator(), Some("http://h/logo/brand.png?t=9"));
        assert_eq!(state.version(), 2);
    }

    #[test]
    fn stale_downgrade_is_ignored() {
        let mut state = ResolutionState::new();
        state.apply_preview("a".into(), "http://h/logo/a".into());
        state.apply_preview("b".into(), "http://h/logo/b".into());
        assert!(!state.downgrade(1));
        assert_eq!(state.status(), Status::Found);
        assert!(state.downgrade(2));
        assert_eq!(state.status(), Status::NotFound);
        assert_eq!(state.version(), 3);
    }

    #[test]
    fn preview_during_confirmed_run_wins() {
        let mut state = ResolutionState::new();
        let epoch = owner(&mut state);
        assert!(state.settle_found(epoch, "old.png".into(), "http://h/logo/old.png?t=1".into()));

        let confirm = state.restart();
        assert!(state.apply_preview("up.png".into(), "blob:up".into()));
        assert!(!state.in_flight());
        assert!(!state.is_current(confirm));
        assert_eq!(state.origin(), Origin::Preview);

        // The confirmed run lands late and is discarded.
        let version = state.version();
        assert!(!state.settle_found(confirm, "new.png".into(), "http://h/logo/new.png?t=2".into()));
        assert!(!state.settle_missing(confirm));
        assert_eq!(state.status(), Status::Found);
        assert_eq!(state.locator(), Some("blob:up"));
        assert_eq!(state.version(), version);
        assert!(!state.snapshot().verified);
    }

    #[test]
    fn version_never_decreases() {
        let mut state = ResolutionState::new();
        let mut last = state.version();
        let mut check = |state: &ResolutionState| {
            assert!(state.version() >= last);
            last = state.version();
        };
        state.apply_preview("a".into(), "l1".into());
        check(&state);
        state.invalidate();
        check(&state);
        let epoch = owner(&mut state);
        state.settle_found(epoch, "a".into(), "l2".into());
        check(&state);
        state.downgrade(state.version());
        check(&state);
        state.invalidate();
        let epoch = owner(&mut state);
        state.settle_unresolved(epoch);
        check(&state);
    }
}
