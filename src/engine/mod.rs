//! Release reconciliation engine
//!
//! Walks the action table for one HelmRelease, starting from the action
//! chosen by [`select::choose_action`]:
//!
//! | action          | success                         | failure                          |
//! |-----------------|---------------------------------|----------------------------------|
//! | dry-run-compare | drift: upgrade; none: Succeeded | Failed, stop                     |
//! | install         | Deployed, test                  | DeployFailed, uninstall          |
//! | upgrade         | Deployed, test                  | DeployFailed, rollback           |
//! | test            | Succeeded, stop                 | TestFailed, rollback / uninstall |
//! | rollback        | RolledBack, stop                | RollbackFailed, stop             |
//! | uninstall       | stop                            | stop                             |
//!
//! Every failure is recorded; the pass continues only along the failure
//! column. Status write failures are recorded too but never change the path.

pub mod select;

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use crate::error::{Error, ErrorCollection, Result};
use crate::helm::{
    self, GetOptions, Release, ReleaseClient, RollbackOptions, TestOptions, UninstallOptions,
    UpgradeOptions,
};
use crate::models::{Action, ChartState, HelmRelease, Phase, ReleaseDefaults, Values};
use crate::status::{self, StatusManager};

pub use select::{Selection, SelectionInput, choose_action};

/// Upper bound on actions visited in one pass. The table has no cycles; the
/// longest path is dry-run-compare, upgrade, test, rollback.
pub const MAX_HOPS: usize = 6;

/// Outcome of one pass through the action table.
#[derive(Debug, Default)]
pub struct PassReport {
    /// Actions in the order they ran
    pub visited: Vec<Action>,
    pub errors: ErrorCollection,
}

impl PassReport {
    pub fn into_result(self) -> Result<()> {
        self.errors.into_result()
    }
}

enum Step {
    Next(Action),
    Stop,
}

pub struct ReleaseEngine {
    client: Arc<dyn ReleaseClient>,
    status: Arc<StatusManager>,
    defaults: ReleaseDefaults,
}

impl ReleaseEngine {
    pub fn new(
        client: Arc<dyn ReleaseClient>,
        status: Arc<StatusManager>,
        defaults: ReleaseDefaults,
    ) -> Self {
        Self {
            client,
            status,
            defaults,
        }
    }

    pub fn client(&self) -> &dyn ReleaseClient {
        self.client.as_ref()
    }

    pub fn defaults(&self) -> &ReleaseDefaults {
        &self.defaults
    }

    /// Run one pass. `hr` is kept in step with every status write.
    pub async fn run(
        &self,
        hr: &mut HelmRelease,
        selection: Selection,
        chart: &ChartState,
        values: &Values,
    ) -> PassReport {
        let mut pass = Pass {
            engine: self,
            name: hr.release_name(),
            namespace: hr.target_namespace(),
            current: selection.current,
            chart,
            values,
            report: PassReport::default(),
        };

        let mut action = selection.action;
        loop {
            if pass.report.visited.len() >= MAX_HOPS {
                error!(release = %pass.name, visited = ?pass.report.visited, "Action table did not terminate");
                pass.report.errors.push(Error::internal(format!(
                    "reconcile pass exceeded {} actions",
                    MAX_HOPS
                )));
                break;
            }
            pass.report.visited.push(action);

            let step = match action {
                Action::Skip => Step::Stop,
                Action::DryRunCompare => pass.dry_run_compare(hr).await,
                Action::Install => pass.install(hr).await,
                Action::Upgrade => pass.upgrade(hr).await,
                Action::Test => pass.test(hr).await,
                Action::Rollback => pass.rollback(hr).await,
                Action::Uninstall => pass.uninstall(hr).await,
            };

            match step {
                Step::Next(next) => {
                    debug!(release = %pass.name, from = %action, to = %next, "Action transition");
                    action = next;
                }
                Step::Stop => break,
            }
        }

        if !pass.report.errors.is_empty() {
            warn!(
                release = %pass.name,
                record = %hr.name_any(),
                errors = pass.report.errors.len(),
                "Reconcile pass finished with errors"
            );
        }
        pass.report
    }
}

/// State carried between the actions of one pass.
struct Pass<'a> {
    engine: &'a ReleaseEngine,
    name: String,
    namespace: String,
    current: Option<Release>,
    chart: &'a ChartState,
    values: &'a Values,
    report: PassReport,
}

impl Pass<'_> {
    fn client(&self) -> &dyn ReleaseClient {
        self.engine.client.as_ref()
    }

    fn defaults(&self) -> &ReleaseDefaults {
        &self.engine.defaults
    }

    fn record(&mut self, action: Action, err: Error) {
        error!(release = %self.name, action = %action, error = %err, "Release action failed");
        self.report.errors.push(err);
    }

    async fn phase(&mut self, hr: &mut HelmRelease, phase: Phase) {
        if let Err(e) = self.engine.status.set_phase(hr, phase).await {
            error!(release = %self.name, phase = %phase, error = %e, "Couldn't update status");
            self.report.errors.push(e);
        }
    }

    async fn phase_with_revision(&mut self, hr: &mut HelmRelease, phase: Phase) {
        let revision = self.chart.revision.clone();
        if let Err(e) = self
            .engine
            .status
            .set_phase_with_revision(hr, phase, &revision)
            .await
        {
            error!(release = %self.name, phase = %phase, error = %e, "Couldn't update status");
            self.report.errors.push(e);
        }
    }

    fn upgrade_options(&self, hr: &HelmRelease, install: bool, dry_run: bool) -> UpgradeOptions {
        let policy = hr.values_policy();
        let defaults = self.defaults();
        UpgradeOptions {
            namespace: self.namespace.clone(),
            install,
            dry_run,
            force: hr.spec.force_upgrade,
            reuse_values: !install && policy.reuse_values,
            reset_values: !install && policy.reset_values,
            skip_crds: hr.spec.skip_crds,
            max_history: hr.max_history(defaults),
            wait: hr.wait(defaults),
            timeout: hr.timeout(defaults),
        }
    }

    async fn dry_run_compare(&mut self, hr: &mut HelmRelease) -> Step {
        let Some(current) = self.current.clone() else {
            // Nothing live to compare against.
            return Step::Next(Action::Install);
        };
        info!(release = %self.name, version = current.version, "Running dry-run upgrade to compare with release");

        let opts = self.upgrade_options(hr, false, true);
        let rendered = self
            .client()
            .upgrade(&self.chart.chart_path, &self.name, self.values, &opts)
            .await;
        let desired = match rendered {
            Ok(desired) => desired,
            Err(e) => {
                self.record(Action::DryRunCompare, e);
                self.phase(hr, Phase::Failed).await;
                return Step::Stop;
            }
        };

        let drift = helm::diff(&current, &desired);
        if !drift.is_empty() {
            info!(release = %self.name, "Release drifted from desired state");
            debug!(release = %self.name, diff = %drift, "Drift");
            return Step::Next(Action::Upgrade);
        }

        if !status::has_rolled_back(hr) {
            self.phase(hr, Phase::Succeeded).await;
        }
        info!(release = %self.name, "No changes");
        Step::Stop
    }

    async fn install(&mut self, hr: &mut HelmRelease) -> Step {
        info!(release = %self.name, namespace = %self.namespace, revision = %self.chart.revision, "Running installation");
        self.phase_with_revision(hr, Phase::Installing).await;

        let opts = self.upgrade_options(hr, true, false);
        let result = self
            .client()
            .upgrade(&self.chart.chart_path, &self.name, self.values, &opts)
            .await;
        match result {
            Ok(_) => {
                self.phase(hr, Phase::Deployed).await;
                info!(release = %self.name, revision = %self.chart.revision, "Installation succeeded");
                Step::Next(Action::Test)
            }
            Err(e) => {
                self.record(Action::Install, e);
                self.phase(hr, Phase::DeployFailed).await;
                Step::Next(Action::Uninstall)
            }
        }
    }

    async fn upgrade(&mut self, hr: &mut HelmRelease) -> Step {
        info!(release = %self.name, namespace = %self.namespace, revision = %self.chart.revision, "Running upgrade");
        self.phase_with_revision(hr, Phase::Upgrading).await;

        let opts = self.upgrade_options(hr, false, false);
        let result = self
            .client()
            .upgrade(&self.chart.chart_path, &self.name, self.values, &opts)
            .await;
        match result {
            Ok(_) => {
                self.phase(hr, Phase::Deployed).await;
                info!(release = %self.name, revision = %self.chart.revision, "Upgrade succeeded");
                Step::Next(Action::Test)
            }
            Err(e) => {
                self.record(Action::Upgrade, e);
                self.phase(hr, Phase::DeployFailed).await;
                Step::Next(Action::Rollback)
            }
        }
    }

    async fn test(&mut self, hr: &mut HelmRelease) -> Step {
        let policy = hr.spec.test.clone();
        if policy.enable {
            info!(release = %self.name, "Running tests");
            self.phase(hr, Phase::Testing).await;

            let opts = TestOptions {
                namespace: self.namespace.clone(),
                timeout: hr.test_timeout(self.defaults()),
                cleanup: policy.cleanup(),
            };
            let result = self.client().test(&self.name, &opts).await;
            if let Err(e) = result {
                self.record(Action::Test, e);
                self.phase(hr, Phase::TestFailed).await;
                if !policy.ignore_failures() {
                    return match self.current {
                        None => Step::Next(Action::Uninstall),
                        Some(_) => Step::Next(Action::Rollback),
                    };
                }
                info!(release = %self.name, revision = %self.chart.revision, "Test failed, ignoring failures");
            } else {
                info!(release = %self.name, revision = %self.chart.revision, "Tests passed");
            }
        }

        self.phase_with_revision(hr, Phase::Succeeded).await;
        Step::Stop
    }

    async fn rollback(&mut self, hr: &mut HelmRelease) -> Step {
        let policy = hr.spec.rollback.clone();
        if !policy.enable {
            debug!(release = %self.name, "Rollback disabled");
            return Step::Stop;
        }

        let get = GetOptions {
            namespace: self.namespace.clone(),
            version: 0,
        };
        let result = self.client().get(&self.name, &get).await;
        let latest = match result {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                debug!(release = %self.name, "No release to roll back");
                return Step::Stop;
            }
            Err(e) => {
                self.record(Action::Rollback, e);
                return Step::Stop;
            }
        };

        let Some(current) = &self.current else {
            debug!(release = %self.name, "No earlier release to roll back to");
            return Step::Stop;
        };
        if current.version >= latest.version {
            debug!(release = %self.name, version = latest.version, "Nothing to roll back");
            return Step::Stop;
        }

        info!(release = %self.name, from = latest.version, to = current.version, "Running rollback");
        self.phase(hr, Phase::RollingBack).await;

        let opts = RollbackOptions {
            namespace: self.namespace.clone(),
            timeout: hr.rollback_timeout(self.defaults()),
            wait: policy.wait,
            disable_hooks: policy.disable_hooks,
            recreate: policy.recreate,
            force: policy.force,
        };
        let result = self.client().rollback(&self.name, &opts).await;
        match result {
            Ok(release) => {
                info!(release = %self.name, version = release.version, "Rollback succeeded");
                self.phase(hr, Phase::RolledBack).await;
            }
            Err(e) => {
                self.record(Action::Rollback, e);
                self.phase(hr, Phase::RollbackFailed).await;
            }
        }
        Step::Stop
    }

    async fn uninstall(&mut self, hr: &HelmRelease) -> Step {
        info!(release = %self.name, namespace = %self.namespace, "Running uninstall");
        let opts = UninstallOptions {
            namespace: self.namespace.clone(),
            keep_history: false,
            timeout: hr.timeout(self.defaults()),
        };
        let result = self.client().uninstall(&self.name, &opts).await;
        if let Err(e) = result {
            self.record(Action::Uninstall, e);
        }
        Step::Stop
    }
}
