//! Phase to condition mapping and condition merging
//!
//! Pure functions; persistence lives in `status::StatusManager`.

use chrono::{DateTime, Utc};

use crate::models::{Condition, ConditionStatus, ConditionType, HelmRelease, HelmReleaseStatus, Phase};

/// Conditions reported for `phase`.
///
/// The first entry is the primary condition for the phase. Failure phases
/// that end a release attempt also carry `Released=False`, so that
/// `Released` alone tells whether the record is healthy.
pub fn conditions_for_phase(hr: &HelmRelease, phase: Phase, now: DateTime<Utc>) -> Vec<Condition> {
    use ConditionStatus::{False, True, Unknown};
    use ConditionType::{ChartFetched, Deployed, Released, RolledBack, Tested};

    let release = hr.release_name();
    let ns = hr.target_namespace();
    let about = |what: &str| format!("{} Helm release '{}' in '{}'.", what, release, ns);

    let (type_, status, message, release_failed) = match phase {
        Phase::Installing => (Deployed, Unknown, about("Running installation for"), false),
        Phase::Upgrading => (Deployed, Unknown, about("Running upgrade for"), false),
        Phase::Deployed => (
            Deployed,
            True,
            about("Installation or upgrade succeeded for"),
            false,
        ),
        Phase::DeployFailed => (
            Deployed,
            False,
            about("Installation or upgrade failed for"),
            true,
        ),
        Phase::Succeeded => (Released, True, about("Release was successful for"), false),
        Phase::Failed => (Released, False, about("Release failed for"), false),
        Phase::Testing => (Tested, Unknown, about("Testing"), false),
        Phase::TestFailed => (
            Tested,
            False,
            about("Test failed for"),
            !hr.spec.test.ignore_failures(),
        ),
        Phase::RollingBack => (RolledBack, Unknown, about("Rolling back"), false),
        Phase::RolledBack => (RolledBack, True, about("Rolled back"), false),
        Phase::RollbackFailed => (RolledBack, False, about("Rollback failed for"), true),
        Phase::ChartFetched => (
            ChartFetched,
            True,
            about("Chart fetch was successful for"),
            false,
        ),
        Phase::ChartFetchFailed => (ChartFetched, False, about("Chart fetch failed for"), true),
    };

    let mut conditions = vec![Condition::new(type_, status, phase.as_str(), message.clone(), now)];
    if release_failed {
        conditions.push(Condition::new(Released, False, phase.as_str(), message, now));
    }
    conditions
}

/// Merge `conditions` into `status`, computed against `prior`.
///
/// A condition whose status matches the prior condition of the same type
/// keeps the prior `lastTransitionTime`. `Released=True` drops any
/// `RolledBack` condition and resets the rollback counter; `RolledBack=True`
/// increments it.
pub fn apply_conditions(status: &mut HelmReleaseStatus, prior: &HelmReleaseStatus, conditions: &[Condition]) {
    for condition in conditions {
        let mut condition = condition.clone();
        if let Some(current) = prior.condition(condition.type_) {
            if current.status == condition.status {
                condition.last_transition_time = current.last_transition_time;
            }
        }

        status.conditions.retain(|c| c.type_ != condition.type_);
        let (type_, is_true) = (condition.type_, condition.is_true());
        status.conditions.push(condition);

        match type_ {
            ConditionType::Released if is_true => {
                status.conditions.retain(|c| c.type_ != ConditionType::RolledBack);
                status.rollback_count = 0;
            }
            ConditionType::RolledBack if is_true => {
                status.rollback_count += 1;
            }
            _ => {}
        }
    }
}
