//! Selection plus engine passes against the in-memory release store
//!
//! Each test drives `choose_action` and `ReleaseEngine::run` the way the
//! controller does, then inspects release revisions and stored statuses.

use std::path::PathBuf;
use std::sync::Arc;

use helmsync::engine::{PassReport, ReleaseEngine, SelectionInput, choose_action};
use helmsync::fake::{FakeOp, FakeReleaseClient, MemoryStatusStore};
use helmsync::helm::ReleaseStatus;
use helmsync::models::{
    Action, ChartSpec, ChartState, ConditionStatus, ConditionType, HelmRelease, HelmReleaseSpec,
    Phase, ReleaseDefaults, RollbackPolicy, TestPolicy, Values,
};
use helmsync::retry::RetryConfig;
use helmsync::status::StatusManager;
use kube::api::ObjectMeta;

const RELEASE: &str = "apps-web";

struct Harness {
    client: Arc<FakeReleaseClient>,
    store: Arc<MemoryStatusStore>,
    status: Arc<StatusManager>,
    engine: ReleaseEngine,
}

impl Harness {
    fn new() -> Self {
        let client = Arc::new(FakeReleaseClient::new());
        let store = Arc::new(MemoryStatusStore::new());
        let status = Arc::new(StatusManager::new(store.clone(), RetryConfig::default()));
        let engine = ReleaseEngine::new(client.clone(), status.clone(), ReleaseDefaults::default());
        Self {
            client,
            store,
            status,
            engine,
        }
    }

    /// One pass: select, then walk the action table.
    async fn pass(&self, hr: &mut HelmRelease, values: &Values) -> PassReport {
        let revision = hr.spec.chart.version.clone();
        let changed = hr
            .status
            .as_ref()
            .and_then(|s| s.last_attempted_revision.as_deref())
            != Some(revision.as_str());
        let chart = ChartState {
            chart_path: PathBuf::from("/cache/nginx-1.2.3"),
            revision,
            changed,
        };
        let input = SelectionInput::from_record(hr, changed);
        let selection = choose_action(self.engine.client(), hr, input, self.engine.defaults())
            .await
            .unwrap();
        self.engine.run(hr, selection, &chart, values).await
    }

    /// What the controller does after a pass.
    async fn observe(&self, hr: &mut HelmRelease) {
        let generation = hr.generation();
        self.status.set_observed_generation(hr, generation).await.unwrap();
    }

    fn count_phase(&self, phase: Phase) -> usize {
        self.store
            .statuses()
            .iter()
            .filter(|s| s.phase == Some(phase))
            .count()
    }
}

fn record(test: bool, rollback: bool) -> HelmRelease {
    let mut hr = HelmRelease::new(
        "web",
        HelmReleaseSpec {
            chart: ChartSpec {
                name: "nginx".to_string(),
                version: "1.2.3".to_string(),
                repository: "https://charts.example.com".to_string(),
                secret_ref: None,
            },
            test: TestPolicy {
                enable: test,
                ..Default::default()
            },
            rollback: RollbackPolicy {
                enable: rollback,
                ..Default::default()
            },
            ..Default::default()
        },
    );
    hr.metadata = ObjectMeta {
        name: Some("web".to_string()),
        namespace: Some("apps".to_string()),
        generation: Some(1),
        ..Default::default()
    };
    hr
}

fn values() -> Values {
    Values::map_from_yaml_str("replicaCount: 2\n").unwrap()
}

fn released(hr: &HelmRelease) -> Option<ConditionStatus> {
    hr.status
        .as_ref()
        .and_then(|s| s.condition(ConditionType::Released))
        .map(|c| c.status)
}

#[tokio::test]
async fn test_first_deploy_installs_and_succeeds_through_test() {
    let h = Harness::new();
    let mut hr = h.store.insert(record(true, false));

    let report = h.pass(&mut hr, &values()).await;

    assert_eq!(report.visited, vec![Action::Install, Action::Test]);
    assert!(report.errors.is_empty());
    assert_eq!(
        h.store.phases(),
        vec![Phase::Installing, Phase::Deployed, Phase::Testing, Phase::Succeeded]
    );
    assert_eq!(h.client.mutating_calls(), vec![FakeOp::Install]);
    assert!(h.client.upgrade_calls()[0].install);

    let status = hr.status.clone().unwrap();
    assert_eq!(status.phase, Some(Phase::Succeeded));
    assert_eq!(status.revision.as_deref(), Some("1.2.3"));
    assert_eq!(status.last_attempted_revision.as_deref(), Some("1.2.3"));
    assert_eq!(released(&hr), Some(ConditionStatus::True));
}

#[tokio::test]
async fn test_second_identical_pass_adds_no_revision() {
    let h = Harness::new();
    let mut hr = h.store.insert(record(false, false));
    h.pass(&mut hr, &values()).await;
    h.observe(&mut hr).await;
    assert_eq!(h.client.revisions(RELEASE), 1);
    let mutating_before = h.client.mutating_calls().len();

    let report = h.pass(&mut hr, &values()).await;

    assert_eq!(report.visited, vec![Action::DryRunCompare]);
    assert!(report.errors.is_empty());
    assert_eq!(h.client.revisions(RELEASE), 1);
    assert_eq!(h.client.mutating_calls().len(), mutating_before);
    assert!(h.client.upgrade_calls().last().unwrap().dry_run);
    assert_eq!(hr.status.as_ref().unwrap().phase, Some(Phase::Succeeded));
}

#[tokio::test]
async fn test_changed_values_on_synced_record_are_detected_as_drift() {
    let h = Harness::new();
    let mut hr = h.store.insert(record(false, false));
    h.pass(&mut hr, &values()).await;
    h.observe(&mut hr).await;

    let changed = Values::map_from_yaml_str("replicaCount: 3\n").unwrap();
    let report = h.pass(&mut hr, &changed).await;

    assert_eq!(
        report.visited,
        vec![Action::DryRunCompare, Action::Upgrade, Action::Test]
    );
    assert_eq!(h.client.revisions(RELEASE), 2);
    let latest = h.client.latest(RELEASE).unwrap();
    assert_eq!(latest.config, changed);
    assert_eq!(latest.status, ReleaseStatus::Deployed);
}

#[tokio::test]
async fn test_out_of_band_edit_triggers_upgrade() {
    let h = Harness::new();
    let mut hr = h.store.insert(record(false, false));
    h.pass(&mut hr, &values()).await;
    h.observe(&mut hr).await;
    h.client
        .tamper(RELEASE, "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: intruder\n");

    let report = h.pass(&mut hr, &values()).await;

    assert_eq!(
        report.visited,
        vec![Action::DryRunCompare, Action::Upgrade, Action::Test]
    );
    assert_eq!(h.client.revisions(RELEASE), 2);
    assert_eq!(hr.status.as_ref().unwrap().phase, Some(Phase::Succeeded));
}

#[tokio::test]
async fn test_failed_install_uninstalls_and_records_one_deploy_failure() {
    let h = Harness::new();
    h.client.fail_on(FakeOp::Install);
    let mut hr = h.store.insert(record(true, true));

    let report = h.pass(&mut hr, &values()).await;

    assert_eq!(report.visited, vec![Action::Install, Action::Uninstall]);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(h.count_phase(Phase::DeployFailed), 1);
    assert_eq!(h.count_phase(Phase::Succeeded), 0);
    assert_eq!(
        h.client.mutating_calls(),
        vec![FakeOp::Install, FakeOp::Uninstall]
    );
    assert!(h.client.latest(RELEASE).is_none());
    assert_eq!(released(&hr), Some(ConditionStatus::False));
}

#[tokio::test]
async fn test_failed_install_with_failing_uninstall_still_terminates() {
    let h = Harness::new();
    h.client.fail_on(FakeOp::Install);
    h.client.fail_on(FakeOp::Uninstall);
    let mut hr = h.store.insert(record(false, false));

    let report = h.pass(&mut hr, &values()).await;

    assert_eq!(report.visited, vec![Action::Install, Action::Uninstall]);
    assert_eq!(report.errors.len(), 2);
    assert_eq!(h.count_phase(Phase::DeployFailed), 1);
    assert_eq!(h.count_phase(Phase::Succeeded), 0);

    let message = report.into_result().unwrap_err().to_string();
    assert!(message.contains("Uninstall"), "{}", message);
    assert!(message.contains(", previous error: "), "{}", message);
}

#[tokio::test]
async fn test_failed_test_without_rollback_makes_no_further_change() {
    let h = Harness::new();
    h.client
        .seed(RELEASE, "apps", ReleaseStatus::Deployed, "", Values::empty_map());
    h.client.fail_on(FakeOp::Test);
    let mut hr = h.store.insert(record(true, false));

    let report = h.pass(&mut hr, &values()).await;

    assert_eq!(
        report.visited,
        vec![Action::Upgrade, Action::Test, Action::Rollback]
    );
    assert_eq!(h.client.mutating_calls(), vec![FakeOp::Upgrade]);
    assert_eq!(hr.status.as_ref().unwrap().phase, Some(Phase::TestFailed));
    assert_eq!(released(&hr), Some(ConditionStatus::False));
}

#[tokio::test]
async fn test_failed_test_on_first_install_uninstalls() {
    let h = Harness::new();
    h.client.fail_on(FakeOp::Test);
    let mut hr = h.store.insert(record(true, true));

    let report = h.pass(&mut hr, &values()).await;

    assert_eq!(
        report.visited,
        vec![Action::Install, Action::Test, Action::Uninstall]
    );
    assert!(h.client.latest(RELEASE).is_none());
}

#[tokio::test]
async fn test_ignored_test_failure_still_succeeds() {
    let h = Harness::new();
    h.client.fail_on(FakeOp::Test);
    let mut spec_record = record(true, true);
    spec_record.spec.test.ignore_failures = Some(true);
    let mut hr = h.store.insert(spec_record);

    let report = h.pass(&mut hr, &values()).await;

    assert_eq!(report.visited, vec![Action::Install, Action::Test]);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(hr.status.as_ref().unwrap().phase, Some(Phase::Succeeded));
    assert_eq!(released(&hr), Some(ConditionStatus::True));
}

#[tokio::test]
async fn test_failed_upgrade_rolls_back_then_holds_still() {
    let h = Harness::new();
    h.client
        .seed(RELEASE, "apps", ReleaseStatus::Deployed, "", Values::empty_map());
    h.client.fail_on(FakeOp::Upgrade);
    let mut hr = h.store.insert(record(false, true));

    let report = h.pass(&mut hr, &values()).await;

    assert_eq!(report.visited, vec![Action::Upgrade, Action::Rollback]);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(
        h.store.phases(),
        vec![
            Phase::Upgrading,
            Phase::DeployFailed,
            Phase::RollingBack,
            Phase::RolledBack
        ]
    );
    let latest = h.client.latest(RELEASE).unwrap();
    assert_eq!(latest.version, 3);
    assert_eq!(latest.status, ReleaseStatus::Deployed);
    assert_eq!(hr.status.as_ref().unwrap().rollback_count, 1);

    // Unchanged chart, no retry: compare against the failed revision and
    // leave the rolled-back release alone.
    h.observe(&mut hr).await;
    h.client.succeed_on(FakeOp::Upgrade);
    let writes = h.store.writes();
    let report = h.pass(&mut hr, &values()).await;

    assert_eq!(report.visited, vec![Action::DryRunCompare]);
    assert!(report.errors.is_empty());
    assert_eq!(h.client.revisions(RELEASE), 3);
    assert_eq!(h.store.writes(), writes);
}

#[tokio::test]
async fn test_rolled_back_record_retries_upgrade_when_allowed() {
    let h = Harness::new();
    h.client
        .seed(RELEASE, "apps", ReleaseStatus::Deployed, "", Values::empty_map());
    h.client.fail_on(FakeOp::Upgrade);
    let mut spec_record = record(false, true);
    spec_record.spec.rollback.retry = true;
    spec_record.spec.rollback.max_retries = Some(2);
    let mut hr = h.store.insert(spec_record);
    h.pass(&mut hr, &values()).await;
    h.observe(&mut hr).await;

    h.client.succeed_on(FakeOp::Upgrade);
    let report = h.pass(&mut hr, &values()).await;

    assert_eq!(report.visited, vec![Action::Upgrade, Action::Test]);
    assert_eq!(hr.status.as_ref().unwrap().rollback_count, 0);
    assert_eq!(hr.status.as_ref().unwrap().phase, Some(Phase::Succeeded));
}

#[tokio::test]
async fn test_pending_release_blocks_selection() {
    let h = Harness::new();
    h.client
        .seed(RELEASE, "apps", ReleaseStatus::PendingUpgrade, "", Values::empty_map());
    let hr = h.store.insert(record(false, false));

    let err = choose_action(
        h.engine.client(),
        &hr,
        SelectionInput::from_record(&hr, true),
        h.engine.defaults(),
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("pending-upgrade"), "{}", err);
    assert!(h.client.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_status_conflicts_are_retried_transparently() {
    let h = Harness::new();
    let mut hr = h.store.insert(record(false, false));
    h.store.fail_next_writes_with_conflict(2);

    let report = h.pass(&mut hr, &values()).await;

    assert!(report.errors.is_empty());
    assert_eq!(h.store.conflicts(), 2);
    assert_eq!(hr.status.as_ref().unwrap().phase, Some(Phase::Succeeded));
}
