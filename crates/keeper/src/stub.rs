//! Scripted in-memory upstream for tests and offline runs.

use crate::upstream::{ProbeVerdict, Upstream};
use async_trait::async_trait;
use brandmark_core::{BrandError, BrandResult, RemoteConfig};
use futures_timer::Delay;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubProbe {
    Present,
    Absent,
    /// The request fails without an answer.
    Fails,
    /// The request never completes.
    Hangs,
}

#[derive(Debug, Clone)]
struct Script {
    asset_id: Option<String>,
    config_available: bool,
    config_hangs: bool,
    probes: HashMap<String, StubProbe>,
    latency: Duration,
}

/// Upstream whose answers are set by the test, counting every call it gets.
///
/// Ids without a scripted probe answer are absent.
pub struct StubUpstream {
    script: Mutex<Script>,
    config_calls: AtomicUsize,
    probe_calls: AtomicUsize,
}

impl Default for StubUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl StubUpstream {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                asset_id: None,
                config_available: true,
                config_hangs: false,
                probes: HashMap::new(),
                latency: Duration::ZERO,
            }),
            config_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
        }
    }

    /// Configured with `asset_id`, which exists.
    pub fn serving(asset_id: &str) -> Self {
        let stub = Self::new();
        stub.set_asset_id(Some(asset_id));
        stub.set_probe(asset_id, StubProbe::Present);
        stub
    }

    pub fn set_asset_id(&self, asset_id: Option<&str>) {
        self.script().asset_id = asset_id.map(str::to_string);
    }

    pub fn set_probe(&self, asset_id: &str, probe: StubProbe) {
        self.script().probes.insert(asset_id.to_string(), probe);
    }

    pub fn set_config_available(&self, available: bool) {
        self.script().config_available = available;
    }

    pub fn set_config_hangs(&self, hangs: bool) {
        self.script().config_hangs = hangs;
    }

    /// Delay applied before every answer.
    pub fn set_latency(&self, latency: Duration) {
        self.script().latency = latency;
    }

    pub fn config_calls(&self) -> usize {
        self.config_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Upstream for StubUpstream {
    async fn fetch_config(&self) -> BrandResult<RemoteConfig> {
        self.config_calls.fetch_add(1, Ordering::SeqCst);
        let (latency, hangs) = {
            let script = self.script();
            (script.latency, script.config_hangs)
        };
        if hangs {
            futures::future::pending::<()>().await;
        }
        Delay::new(latency).await;

        let script = self.script();
        if !script.config_available {
            return Err(BrandError::ConfigUnavailable("stub: config offline".into()));
        }
        Ok(RemoteConfig {
            asset_id: script.asset_id.clone(),
        })
    }

    async fn probe(&self, asset_id: &str) -> BrandResult<ProbeVerdict> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let (latency, probe) = {
            let script = self.script();
            let probe = script
                .probes
                .get(asset_id)
                .copied()
                .unwrap_or(StubProbe::Absent);
            (script.latency, probe)
        };
        if probe == StubProbe::Hangs {
            futures::future::pending::<()>().await;
        }
        Delay::new(latency).await;

        match probe {
            StubProbe::Present => Ok(ProbeVerdict::Present),
            StubProbe::Absent | StubProbe::Hangs => Ok(ProbeVerdict::Absent),
            StubProbe::Fails => Err(BrandError::transport("stub: connection reset")),
        }
    }
}
