//! In-memory collaborators
//!
//! Stand-ins for the release store, the HelmRelease API and the values
//! backends. They keep everything in process and record what was asked of
//! them, so reconcile passes can be driven and inspected without a cluster.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use kube::ResourceExt;

use crate::controller::chart::{ChartSource, chart_changed};
use crate::error::{Error, Result};
use crate::helm::{
    GetOptions, HistoryOptions, Release, ReleaseClient, ReleaseStatus, RollbackOptions,
    TestOptions, UninstallOptions, UpgradeOptions,
};
use crate::models::{ChartState, HelmRelease, HelmReleaseStatus, Phase, Values};
use crate::status::StatusStore;
use crate::values::ValuesResolver;

/// Operations a [`FakeReleaseClient`] has been asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Get,
    History,
    Install,
    Upgrade,
    DryRun,
    Test,
    Rollback,
    Uninstall,
}

impl FakeOp {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            FakeOp::Install | FakeOp::Upgrade | FakeOp::Rollback | FakeOp::Uninstall
        )
    }
}

#[derive(Default)]
struct ReleaseState {
    /// Revisions per release name, oldest first
    releases: BTreeMap<String, Vec<Release>>,
    calls: Vec<FakeOp>,
    upgrades: Vec<UpgradeOptions>,
    failing: Vec<FakeOp>,
}

/// Release store kept in memory.
///
/// Rendering is deterministic: the manifest is derived from the release
/// name and chart path, and the stored config is the values passed in. A
/// failed install or upgrade leaves a `failed` revision behind, the way Helm
/// does.
#[derive(Default)]
pub struct FakeReleaseClient {
    state: Mutex<ReleaseState>,
}

impl FakeReleaseClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReleaseState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every later call of `op` fail.
    pub fn fail_on(&self, op: FakeOp) {
        self.lock().failing.push(op);
    }

    pub fn succeed_on(&self, op: FakeOp) {
        self.lock().failing.retain(|o| *o != op);
    }

    /// Add a revision directly, bypassing the call log.
    pub fn seed(
        &self,
        name: &str,
        namespace: &str,
        status: ReleaseStatus,
        manifest: &str,
        config: Values,
    ) {
        let mut state = self.lock();
        let revisions = state.releases.entry(name.to_string()).or_default();
        let version = revisions.last().map(|r| r.version).unwrap_or(0) + 1;
        revisions.push(Release {
            name: name.to_string(),
            namespace: namespace.to_string(),
            version,
            status,
            chart_name: String::new(),
            chart_version: String::new(),
            manifest: manifest.to_string(),
            config,
        });
    }

    /// Replace the live manifest, as an out-of-band edit would.
    pub fn tamper(&self, name: &str, manifest: &str) {
        if let Some(latest) = self
            .lock()
            .releases
            .get_mut(name)
            .and_then(|revisions| revisions.last_mut())
        {
            latest.manifest = manifest.to_string();
        }
    }

    pub fn latest(&self, name: &str) -> Option<Release> {
        self.lock()
            .releases
            .get(name)
            .and_then(|revisions| revisions.last().cloned())
    }

    pub fn revisions(&self, name: &str) -> usize {
        self.lock().releases.get(name).map(Vec::len).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<FakeOp> {
        self.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<FakeOp> {
        self.calls().into_iter().filter(FakeOp::is_mutating).collect()
    }

    /// Options of every upgrade call, dry runs included.
    pub fn upgrade_calls(&self) -> Vec<UpgradeOptions> {
        self.lock().upgrades.clone()
    }

    fn enter(&self, op: FakeOp) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(op);
        if state.failing.contains(&op) {
            return Err(Error::helm(format!("injected {:?} failure", op)));
        }
        Ok(())
    }
}

fn render(chart_path: &Path, name: &str, namespace: &str, values: &Values) -> String {
    format!(
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {}\n  namespace: {}\ndata:\n  chart: {}\n  values: {:?}\n",
        name,
        namespace,
        chart_path.display(),
        values.to_json().to_string()
    )
}

fn supersede(revisions: &mut [Release]) {
    for r in revisions.iter_mut() {
        if r.status == ReleaseStatus::Deployed {
            r.status = ReleaseStatus::Superseded;
        }
    }
}

#[async_trait]
impl ReleaseClient for FakeReleaseClient {
    async fn get(&self, name: &str, opts: &GetOptions) -> Result<Option<Release>> {
        self.enter(FakeOp::Get)?;
        let state = self.lock();
        let Some(revisions) = state.releases.get(name) else {
            return Ok(None);
        };
        Ok(if opts.version == 0 {
            revisions.last().cloned()
        } else {
            revisions.iter().find(|r| r.version == opts.version).cloned()
        })
    }

    async fn history(&self, name: &str, opts: &HistoryOptions) -> Result<Vec<Release>> {
        self.enter(FakeOp::History)?;
        let state = self.lock();
        let mut history: Vec<Release> = state
            .releases
            .get(name)
            .map(|r| r.iter().rev().cloned().collect())
            .unwrap_or_default();
        if opts.max > 0 {
            history.truncate(opts.max as usize);
        }
        Ok(history)
    }

    async fn upgrade(
        &self,
        chart_path: &Path,
        name: &str,
        values: &Values,
        opts: &UpgradeOptions,
    ) -> Result<Release> {
        let exists = self.revisions(name) > 0;
        let op = match (opts.dry_run, exists) {
            (true, _) => FakeOp::DryRun,
            (false, false) => FakeOp::Install,
            (false, true) => FakeOp::Upgrade,
        };
        self.lock().upgrades.push(opts.clone());
        let injected = self.enter(op);

        let mut state = self.lock();
        if !exists && !opts.install {
            return Err(Error::helm(format!("\"{}\" has no deployed releases", name)));
        }
        let revisions = state.releases.entry(name.to_string()).or_default();
        let version = revisions.last().map(|r| r.version).unwrap_or(0) + 1;
        let mut release = Release {
            name: name.to_string(),
            namespace: opts.namespace.clone(),
            version,
            status: ReleaseStatus::Deployed,
            chart_name: chart_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            chart_version: String::new(),
            manifest: render(chart_path, name, &opts.namespace, values),
            config: values.clone(),
        };

        if opts.dry_run {
            injected?;
            return Ok(release);
        }
        if let Err(e) = injected {
            release.status = ReleaseStatus::Failed;
            revisions.push(release);
            return Err(e);
        }
        supersede(revisions);
        revisions.push(release.clone());
        Ok(release)
    }

    async fn test(&self, _name: &str, _opts: &TestOptions) -> Result<()> {
        self.enter(FakeOp::Test)
    }

    async fn rollback(&self, name: &str, _opts: &RollbackOptions) -> Result<Release> {
        self.enter(FakeOp::Rollback)?;
        let mut state = self.lock();
        let revisions = state
            .releases
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("release {}", name)))?;
        if revisions.len() < 2 {
            return Err(Error::helm(format!("release {} has no previous revision", name)));
        }
        let target = revisions[revisions.len() - 2].clone();
        let version = revisions.last().map(|r| r.version).unwrap_or(0) + 1;
        supersede(revisions);
        let release = Release {
            version,
            status: ReleaseStatus::Deployed,
            ..target
        };
        revisions.push(release.clone());
        Ok(release)
    }

    async fn uninstall(&self, name: &str, _opts: &UninstallOptions) -> Result<()> {
        self.enter(FakeOp::Uninstall)?;
        self.lock().releases.remove(name);
        Ok(())
    }
}

#[derive(Default)]
struct RecordState {
    records: HashMap<(String, String), HelmRelease>,
    next_version: u64,
    writes: usize,
    conflicts: usize,
    forced_conflicts: u32,
    statuses: Vec<HelmReleaseStatus>,
}

/// HelmRelease records kept in memory, with resourceVersion checks.
#[derive(Default)]
pub struct MemoryStatusStore {
    state: Mutex<RecordState>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `hr` and return it with the assigned resourceVersion.
    pub fn insert(&self, mut hr: HelmRelease) -> HelmRelease {
        let mut state = self.lock();
        state.next_version += 1;
        hr.metadata.resource_version = Some(state.next_version.to_string());
        let key = (hr.namespace().unwrap_or_default(), hr.name_any());
        state.records.insert(key, hr.clone());
        hr
    }

    /// Edit the stored spec as a user would; bumps generation.
    pub fn edit_spec<F>(&self, namespace: &str, name: &str, edit: F) -> Option<HelmRelease>
    where
        F: FnOnce(&mut HelmRelease),
    {
        let mut state = self.lock();
        state.next_version += 1;
        let version = state.next_version.to_string();
        let hr = state
            .records
            .get_mut(&(namespace.to_string(), name.to_string()))?;
        edit(hr);
        hr.metadata.generation = Some(hr.metadata.generation.unwrap_or(0) + 1);
        hr.metadata.resource_version = Some(version);
        Some(hr.clone())
    }

    /// Fail the next `n` status writes with a conflict.
    pub fn fail_next_writes_with_conflict(&self, n: u32) {
        self.lock().forced_conflicts = n;
    }

    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn conflicts(&self) -> usize {
        self.lock().conflicts
    }

    /// Every status that was stored, oldest first.
    pub fn statuses(&self) -> Vec<HelmReleaseStatus> {
        self.lock().statuses.clone()
    }

    /// Phases in the order they were stored, collapsing repeats.
    pub fn phases(&self) -> Vec<Phase> {
        let mut phases: Vec<Phase> = Vec::new();
        for phase in self.statuses().into_iter().filter_map(|s| s.phase) {
            if phases.last() != Some(&phase) {
                phases.push(phase);
            }
        }
        phases
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<HelmRelease> {
        self.lock()
            .records
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("HelmRelease {}/{}", namespace, name)))
    }

    async fn write_status(&self, hr: &HelmRelease) -> Result<HelmRelease> {
        let mut state = self.lock();
        if state.forced_conflicts > 0 {
            state.forced_conflicts -= 1;
            state.conflicts += 1;
            return Err(Error::conflict("injected conflict"));
        }

        let key = (hr.namespace().unwrap_or_default(), hr.name_any());
        let stored_version = state
            .records
            .get(&key)
            .ok_or_else(|| Error::not_found(format!("HelmRelease {}/{}", key.0, key.1)))?
            .metadata
            .resource_version
            .clone();
        if stored_version != hr.metadata.resource_version {
            state.conflicts += 1;
            return Err(Error::conflict(format!(
                "resourceVersion {:?} is stale",
                hr.metadata.resource_version
            )));
        }

        state.next_version += 1;
        let version = state.next_version.to_string();
        let status = hr.status.clone();
        let updated = match state.records.get_mut(&key) {
            Some(stored) => {
                stored.status = status.clone();
                stored.metadata.resource_version = Some(version);
                stored.clone()
            }
            None => return Err(Error::not_found(format!("HelmRelease {}/{}", key.0, key.1))),
        };
        state.writes += 1;
        state.statuses.push(status.unwrap_or_default());
        Ok(updated)
    }

    async fn write_finalizers(
        &self,
        hr: &HelmRelease,
        finalizers: Vec<String>,
    ) -> Result<HelmRelease> {
        let mut state = self.lock();
        let key = (hr.namespace().unwrap_or_default(), hr.name_any());
        state.next_version += 1;
        let version = state.next_version.to_string();
        let stored = state
            .records
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(format!("HelmRelease {}/{}", key.0, key.1)))?;
        if stored.metadata.resource_version != hr.metadata.resource_version {
            return Err(Error::conflict("resourceVersion is stale"));
        }
        stored.metadata.finalizers = Some(finalizers);
        stored.metadata.resource_version = Some(version);
        let updated = stored.clone();

        // The API server drops a deleting record once its last finalizer is gone.
        let released = updated.metadata.deletion_timestamp.is_some()
            && updated.finalizers().is_empty();
        if released {
            state.records.remove(&key);
        }
        Ok(updated)
    }
}

impl MemoryStatusStore {
    /// Mark the record for deletion, as `kubectl delete` would.
    pub fn mark_deleted(&self, namespace: &str, name: &str) -> Option<HelmRelease> {
        let mut state = self.lock();
        state.next_version += 1;
        let version = state.next_version.to_string();
        let hr = state
            .records
            .get_mut(&(namespace.to_string(), name.to_string()))?;
        hr.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        hr.metadata.resource_version = Some(version);
        Some(hr.clone())
    }

    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.lock()
            .records
            .contains_key(&(namespace.to_string(), name.to_string()))
    }
}

/// Values backends served from fixed maps.
#[derive(Default)]
pub struct StaticValuesResolver {
    config_maps: HashMap<(String, String), BTreeMap<String, String>>,
    secrets: HashMap<(String, String), BTreeMap<String, String>>,
    urls: HashMap<String, String>,
    chart_files: HashMap<String, String>,
    unavailable: HashSet<(String, String)>,
    lookups: AtomicUsize,
}

impl StaticValuesResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_map(mut self, namespace: &str, name: &str, key: &str, content: &str) -> Self {
        self.config_maps
            .entry((namespace.to_string(), name.to_string()))
            .or_default()
            .insert(key.to_string(), content.to_string());
        self
    }

    pub fn with_secret(mut self, namespace: &str, name: &str, key: &str, content: &str) -> Self {
        self.secrets
            .entry((namespace.to_string(), name.to_string()))
            .or_default()
            .insert(key.to_string(), content.to_string());
        self
    }

    pub fn with_url(mut self, url: &str, content: &str) -> Self {
        self.urls.insert(url.to_string(), content.to_string());
        self
    }

    pub fn with_chart_file(mut self, file: &str, content: &str) -> Self {
        self.chart_files.insert(file.to_string(), content.to_string());
        self
    }

    /// Make ConfigMap and Secret lookups of `namespace/name` fail, as an
    /// unreachable or forbidding API server would.
    pub fn with_unavailable(mut self, namespace: &str, name: &str) -> Self {
        self.unavailable
            .insert((namespace.to_string(), name.to_string()));
        self
    }

    fn check_available(&self, namespace: &str, name: &str) -> Result<()> {
        if self
            .unavailable
            .contains(&(namespace.to_string(), name.to_string()))
        {
            return Err(Error::internal(format!(
                "lookup of {}/{} failed: service unavailable",
                namespace, name
            )));
        }
        Ok(())
    }

    /// Number of backend lookups served.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValuesResolver for StaticValuesResolver {
    async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available(namespace, name)?;
        Ok(self
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available(namespace, name)?;
        Ok(self
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn fetch_url(&self, url: &str) -> Result<Option<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.urls.get(url).cloned())
    }

    async fn read_chart_file(&self, _chart_path: &Path, file: &str) -> Result<Option<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.chart_files.get(file).cloned())
    }
}

/// Chart source that always hands out the same unpacked chart.
pub struct StaticChartSource {
    chart_path: std::path::PathBuf,
    failing: Mutex<bool>,
}

impl StaticChartSource {
    pub fn new(chart_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            chart_path: chart_path.into(),
            failing: Mutex::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(|e| e.into_inner()) = failing;
    }
}

#[async_trait]
impl ChartSource for StaticChartSource {
    async fn fetch(&self, hr: &HelmRelease) -> Result<ChartState> {
        if *self.failing.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(Error::chart(format!(
                "chart {} {} not found",
                hr.spec.chart.name, hr.spec.chart.version
            )));
        }
        let revision = hr.spec.chart.version.clone();
        let changed = chart_changed(hr, &revision);
        Ok(ChartState {
            chart_path: self.chart_path.clone(),
            revision,
            changed,
        })
    }
}
