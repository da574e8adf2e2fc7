//! Action selection
//!
//! Decides where a reconcile pass enters the action table, from the live
//! release and a few facts about the record. The first matching rule wins:
//!
//! 1. lookup failure (other than not found) is an error
//! 2. no release: `Install`
//! 3. release status that forbids a safe upgrade is an error
//! 4. deletion requested: `Uninstall`
//! 5. generation not yet observed: `Upgrade`
//! 6. last attempt rolled back: `Upgrade` when the chart changed or a retry
//!    is due, otherwise compare against the newest failed or superseded
//!    revision
//! 7. chart changed: `Upgrade`
//! 8. otherwise: `DryRunCompare`

use tracing::debug;

use crate::error::{Error, Result};
use crate::helm::{GetOptions, HistoryOptions, Release, ReleaseClient, ReleaseStatus};
use crate::models::{Action, HelmRelease, ReleaseDefaults};
use crate::status;

/// Facts about the record that steer selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionInput {
    pub chart_changed: bool,
    pub synced: bool,
    pub rolled_back: bool,
    pub retry_upgrade: bool,
}

impl SelectionInput {
    pub fn from_record(hr: &HelmRelease, chart_changed: bool) -> Self {
        Self {
            chart_changed,
            synced: status::has_synced(hr),
            rolled_back: status::has_rolled_back(hr),
            retry_upgrade: status::should_retry_upgrade(hr),
        }
    }
}

/// The entry action plus the release the engine should treat as current.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub action: Action,
    pub current: Option<Release>,
}

impl Selection {
    fn new(action: Action, current: Option<Release>) -> Self {
        Self { action, current }
    }
}

pub async fn choose_action(
    client: &dyn ReleaseClient,
    hr: &HelmRelease,
    input: SelectionInput,
    defaults: &ReleaseDefaults,
) -> Result<Selection> {
    let name = hr.release_name();
    let namespace = hr.target_namespace();

    let get = GetOptions {
        namespace: namespace.clone(),
        version: 0,
    };
    let current = match client.get(&name, &get).await {
        Ok(release) => release,
        Err(e) if e.is_not_found() => None,
        Err(e) => {
            return Err(Error::helm(format!(
                "couldn't retrieve Helm release {}: {}",
                name, e
            )));
        }
    };

    let Some(mut current) = current else {
        return Ok(Selection::new(Action::Install, None));
    };

    if !current.status.allows_upgrade() {
        return Err(Error::DisallowedStatus(format!(
            "status '{}' of release does not allow a safe upgrade",
            current.status
        )));
    }

    if hr.has_deletion_marker() {
        return Ok(Selection::new(Action::Uninstall, Some(current)));
    }

    if !input.synced {
        return Ok(Selection::new(Action::Upgrade, Some(current)));
    }

    if input.rolled_back {
        if input.chart_changed || input.retry_upgrade {
            return Ok(Selection::new(Action::Upgrade, Some(current)));
        }
        let opts = HistoryOptions {
            namespace,
            max: hr.max_history(defaults),
        };
        let history = client.history(&name, &opts).await.map_err(|e| {
            Error::helm(format!(
                "couldn't retrieve history for rolled back release {}: {}",
                name, e
            ))
        })?;
        if let Some(candidate) = history
            .into_iter()
            .find(|r| matches!(r.status, ReleaseStatus::Failed | ReleaseStatus::Superseded))
        {
            debug!(
                release = %name,
                revision = candidate.version,
                "Comparing against last failed or superseded revision"
            );
            current = candidate;
        }
    } else if input.chart_changed {
        return Ok(Selection::new(Action::Upgrade, Some(current)));
    }

    Ok(Selection::new(Action::DryRunCompare, Some(current)))
}
