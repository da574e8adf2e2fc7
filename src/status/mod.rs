//! Status and condition manager
//!
//! Every write recomputes the status from the freshest copy of the record:
//! the first attempt uses the caller's copy, and each conflict retry
//! re-reads the record before merging conditions again. On success the
//! caller's copy is replaced by the stored record.

pub mod conditions;
pub mod store;

use std::sync::Arc;

use chrono::Utc;
use kube::ResourceExt;
use tracing::debug;

use crate::error::Result;
use crate::helm::Release;
use crate::models::{Condition, ConditionType, HelmRelease, HelmReleaseStatus, Phase};
use crate::retry::{RetryConfig, retry_on_conflict};

pub use conditions::{apply_conditions, conditions_for_phase};
pub use store::{KubeStatusStore, StatusStore};

/// True once the status has observed the record's current generation.
pub fn has_synced(hr: &HelmRelease) -> bool {
    hr.status
        .as_ref()
        .and_then(|s| s.observed_generation)
        .is_some_and(|g| g >= hr.generation())
}

/// True when the record is synced and the last release attempt was rolled back.
pub fn has_rolled_back(hr: &HelmRelease) -> bool {
    has_synced(hr)
        && hr
            .status
            .as_ref()
            .and_then(|s| s.condition(ConditionType::RolledBack))
            .is_some_and(Condition::is_true)
}

/// Whether the rollback policy asks for another upgrade attempt.
pub fn should_retry_upgrade(hr: &HelmRelease) -> bool {
    let policy = &hr.spec.rollback;
    if !policy.retry {
        return false;
    }
    let max = policy.max_retries();
    let count = hr.status.as_ref().map(|s| s.rollback_count).unwrap_or(0);
    max == 0 || count <= max
}

pub struct StatusManager {
    store: Arc<dyn StatusStore>,
    retry: RetryConfig,
}

impl StatusManager {
    pub fn new(store: Arc<dyn StatusStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Merge `conditions` and run `setter` over the status, then persist.
    pub async fn set_conditions<F>(
        &self,
        hr: &mut HelmRelease,
        conditions: &[Condition],
        setter: F,
    ) -> Result<()>
    where
        F: Fn(&mut HelmReleaseStatus) + Send + Sync,
    {
        let namespace = hr.namespace().unwrap_or_default();
        let name = hr.name_any();
        let cached = hr.clone();
        let setter = &setter;
        let store = &self.store;

        let updated = retry_on_conflict(&self.retry, "write HelmRelease status", |attempt| {
            let namespace = namespace.clone();
            let name = name.clone();
            let cached = cached.clone();
            async move {
                let mut current = if attempt == 0 {
                    cached
                } else {
                    store.get(&namespace, &name).await?
                };
                let prior = current.status_or_default();
                let mut status = prior.clone();
                apply_conditions(&mut status, &prior, conditions);
                setter(&mut status);
                current.status = Some(status);
                store.write_status(&current).await
            }
        })
        .await?;

        *hr = updated;
        Ok(())
    }

    pub async fn set_phase(&self, hr: &mut HelmRelease, phase: Phase) -> Result<()> {
        self.set_phase_with(hr, phase, |_| {}).await
    }

    /// Record `phase` together with the chart revision it concerns.
    ///
    /// `Installing` and `Upgrading` set `lastAttemptedRevision`; `Succeeded`
    /// sets `revision`. Other phases ignore the revision.
    pub async fn set_phase_with_revision(
        &self,
        hr: &mut HelmRelease,
        phase: Phase,
        revision: &str,
    ) -> Result<()> {
        self.set_phase_with(hr, phase, |status| match phase {
            Phase::Installing | Phase::Upgrading => {
                status.last_attempted_revision = Some(revision.to_string());
            }
            Phase::Succeeded => status.revision = Some(revision.to_string()),
            _ => {}
        })
        .await
    }

    async fn set_phase_with<F>(&self, hr: &mut HelmRelease, phase: Phase, setter: F) -> Result<()>
    where
        F: Fn(&mut HelmReleaseStatus) + Send + Sync,
    {
        debug!(name = %hr.name_any(), phase = %phase, "Setting phase");
        let conditions = conditions_for_phase(hr, phase, Utc::now());
        self.set_conditions(hr, &conditions, |status| {
            status.phase = Some(phase);
            setter(status);
        })
        .await
    }

    /// Advance `observedGeneration`; it never moves backwards.
    pub async fn set_observed_generation(&self, hr: &mut HelmRelease, generation: i64) -> Result<()> {
        self.set_conditions(hr, &[], |status| {
            if status.observed_generation.is_none_or(|g| g < generation) {
                status.observed_generation = Some(generation);
            }
        })
        .await
    }

    /// Record what the release store reports for the live release.
    pub async fn set_release_status(
        &self,
        hr: &mut HelmRelease,
        release: Option<&Release>,
    ) -> Result<()> {
        let name = release.map(|r| r.name.clone());
        let status_str = release.map(|r| r.status.to_string());
        let version = release.map(|r| r.version);
        self.set_conditions(hr, &[], |status| {
            status.release_name = name.clone();
            status.release_status = status_str.clone();
            if version.is_some() {
                status.last_release_revision = version;
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fake::MemoryStatusStore;
    use crate::models::{ChartSpec, ConditionStatus, HelmReleaseSpec, RollbackPolicy};
    use kube::api::ObjectMeta;
    use std::time::Duration;

    fn record() -> HelmRelease {
        let mut hr = HelmRelease::new(
            "web",
            HelmReleaseSpec {
                chart: ChartSpec {
                    name: "nginx".to_string(),
                    version: "1.2.3".to_string(),
                    repository: "https://charts.example.com".to_string(),
                    secret_ref: None,
                },
                ..Default::default()
            },
        );
        hr.metadata = ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some("apps".to_string()),
            generation: Some(2),
            ..Default::default()
        };
        hr
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 1.0,
        }
    }

    #[tokio::test]
    async fn test_phase_with_revision() {
        let store = Arc::new(MemoryStatusStore::new());
        let mut hr = store.insert(record());
        let manager = StatusManager::new(store.clone(), fast_retry());

        manager
            .set_phase_with_revision(&mut hr, Phase::Upgrading, "1.2.3")
            .await
            .unwrap();
        let status = hr.status_or_default();
        assert_eq!(status.phase, Some(Phase::Upgrading));
        assert_eq!(status.last_attempted_revision.as_deref(), Some("1.2.3"));
        assert_eq!(status.revision, None);

        manager
            .set_phase_with_revision(&mut hr, Phase::Succeeded, "1.2.3")
            .await
            .unwrap();
        let stored = store.get("apps", "web").await.unwrap();
        assert_eq!(stored.status_or_default().revision.as_deref(), Some("1.2.3"));
        assert_eq!(stored, hr);
    }

    #[tokio::test]
    async fn test_conflicting_writer_retries_with_fresh_copy() {
        let store = Arc::new(MemoryStatusStore::new());
        let mut ours = store.insert(record());
        let mut theirs = ours.clone();
        let a = StatusManager::new(store.clone(), fast_retry());
        let b = StatusManager::new(store.clone(), fast_retry());

        a.set_phase(&mut ours, Phase::Deployed).await.unwrap();
        let deployed_at = ours
            .status_or_default()
            .condition(ConditionType::Deployed)
            .unwrap()
            .last_transition_time;

        // `theirs` is stale now; the write must re-read and keep our condition.
        b.set_phase(&mut theirs, Phase::Deployed).await.unwrap();
        let status = theirs.status_or_default();
        let deployed = status.condition(ConditionType::Deployed).unwrap();
        assert_eq!(deployed.status, ConditionStatus::True);
        assert_eq!(deployed.last_transition_time, deployed_at);
        assert_eq!(store.conflicts(), 1);
    }

    #[tokio::test]
    async fn test_conflicts_are_surfaced_once_retries_run_out() {
        let store = Arc::new(MemoryStatusStore::new());
        let mut hr = store.insert(record());
        store.fail_next_writes_with_conflict(10);
        let manager = StatusManager::new(store.clone(), fast_retry());

        let err = manager.set_phase(&mut hr, Phase::Failed).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_other_store_errors_are_not_retried() {
        let mut mock = store::MockStatusStore::new();
        mock
            .expect_write_status()
            .times(1)
            .returning(|_| Err(Error::internal("etcd unavailable")));
        let manager = StatusManager::new(Arc::new(mock), fast_retry());

        let mut hr = record();
        assert!(manager.set_phase(&mut hr, Phase::Failed).await.is_err());
    }

    #[tokio::test]
    async fn test_observed_generation_only_advances() {
        let store = Arc::new(MemoryStatusStore::new());
        let mut hr = store.insert(record());
        let manager = StatusManager::new(store, fast_retry());

        assert!(!has_synced(&hr));
        manager.set_observed_generation(&mut hr, 2).await.unwrap();
        assert!(has_synced(&hr));
        manager.set_observed_generation(&mut hr, 1).await.unwrap();
        assert_eq!(hr.status_or_default().observed_generation, Some(2));
    }

    #[test]
    fn test_retry_policy() {
        let mut hr = record();
        assert!(!should_retry_upgrade(&hr));

        hr.spec.rollback = RollbackPolicy {
            enable: true,
            retry: true,
            max_retries: Some(2),
            ..Default::default()
        };
        hr.status = Some(HelmReleaseStatus {
            rollback_count: 2,
            ..Default::default()
        });
        assert!(should_retry_upgrade(&hr));

        hr.status = Some(HelmReleaseStatus {
            rollback_count: 3,
            ..Default::default()
        });
        assert!(!should_retry_upgrade(&hr));

        hr.spec.rollback.max_retries = None;
        assert!(should_retry_upgrade(&hr));
    }

    #[test]
    fn test_rolled_back_requires_sync() {
        let mut hr = record();
        let rolled = conditions_for_phase(&hr, Phase::RolledBack, Utc::now());
        let mut status = HelmReleaseStatus::default();
        apply_conditions(&mut status, &HelmReleaseStatus::default(), &rolled);
        status.observed_generation = Some(1);
        hr.status = Some(status);
        assert!(!has_rolled_back(&hr));

        if let Some(s) = hr.status.as_mut() {
            s.observed_generation = Some(2);
        }
        assert!(has_rolled_back(&hr));
    }
}
