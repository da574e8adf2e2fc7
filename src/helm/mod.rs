//! Helm release store boundary
//!
//! The engine talks to Helm only through [`ReleaseClient`]. The production
//! implementation lives in `cli.rs`; `storage.rs` decodes the release records
//! Helm keeps in Secrets and `diff.rs` compares two renderings of a release.

pub mod cli;
pub mod diff;
pub mod storage;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::error::Result;
use crate::models::Values;

pub use cli::HelmCli;
pub use diff::diff;
pub use storage::SecretStorage;

/// Status of a release as recorded by Helm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    Deployed,
    Failed,
    Superseded,
    Uninstalled,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    #[serde(other)]
    Unknown,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployed => "deployed",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
            Self::Uninstalled => "uninstalled",
            Self::Uninstalling => "uninstalling",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
            Self::PendingRollback => "pending-rollback",
            Self::Unknown => "unknown",
        }
    }

    /// Statuses a new install/upgrade/rollback may safely start from.
    /// Pending states mean another operation is in flight.
    pub fn allows_upgrade(&self) -> bool {
        matches!(
            self,
            Self::Deployed | Self::Failed | Self::Superseded | Self::Uninstalled
        )
    }
}

impl From<&str> for ReleaseStatus {
    fn from(s: &str) -> Self {
        match s {
            "deployed" => Self::Deployed,
            "failed" => Self::Failed,
            "superseded" => Self::Superseded,
            "uninstalled" => Self::Uninstalled,
            "uninstalling" => Self::Uninstalling,
            "pending-install" => Self::PendingInstall,
            "pending-upgrade" => Self::PendingUpgrade,
            "pending-rollback" => Self::PendingRollback,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One revision of a release
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    /// Monotonic revision counter
    pub version: u64,
    pub status: ReleaseStatus,
    pub chart_name: String,
    pub chart_version: String,
    /// Rendered manifest, a multi-document YAML stream
    pub manifest: String,
    /// User-supplied values the revision was rendered with
    pub config: Values,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetOptions {
    pub namespace: String,
    /// Revision to fetch; 0 means the latest
    pub version: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryOptions {
    pub namespace: String,
    /// Maximum number of revisions to return; 0 means all
    pub max: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpgradeOptions {
    pub namespace: String,
    /// Install the release if it does not exist yet
    pub install: bool,
    pub dry_run: bool,
    pub force: bool,
    pub reuse_values: bool,
    pub reset_values: bool,
    pub skip_crds: bool,
    pub max_history: u32,
    pub wait: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestOptions {
    pub namespace: String,
    pub timeout: Duration,
    /// Test pods are removed according to their `helm.sh/hook-delete-policy`
    /// either way. When false, the helm adapter collects their logs
    /// (`helm test --logs`) before they go.
    pub cleanup: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackOptions {
    pub namespace: String,
    pub timeout: Duration,
    pub wait: bool,
    pub disable_hooks: bool,
    pub recreate: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UninstallOptions {
    pub namespace: String,
    pub keep_history: bool,
    pub timeout: Duration,
}

/// Operations against one release store.
///
/// Every call carries its own timeout and returns an error when it expires.
/// `get` returns `Ok(None)` when the release does not exist; any other lookup
/// failure is an error. `history` is ordered newest first.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseClient: Send + Sync {
    async fn get(&self, name: &str, opts: &GetOptions) -> Result<Option<Release>>;

    async fn history(&self, name: &str, opts: &HistoryOptions) -> Result<Vec<Release>>;

    /// Install or upgrade `name` from an unpacked chart directory.
    async fn upgrade(
        &self,
        chart_path: &Path,
        name: &str,
        values: &Values,
        opts: &UpgradeOptions,
    ) -> Result<Release>;

    async fn test(&self, name: &str, opts: &TestOptions) -> Result<()>;

    /// Roll back to the previous revision, returning the new latest revision.
    async fn rollback(&self, name: &str, opts: &RollbackOptions) -> Result<Release>;

    async fn uninstall(&self, name: &str, opts: &UninstallOptions) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_and_unknown_statuses_block_upgrades() {
        for s in [
            ReleaseStatus::PendingInstall,
            ReleaseStatus::PendingUpgrade,
            ReleaseStatus::PendingRollback,
            ReleaseStatus::Uninstalling,
            ReleaseStatus::Unknown,
        ] {
            assert!(!s.allows_upgrade(), "{} should block", s);
        }
        for s in [
            ReleaseStatus::Deployed,
            ReleaseStatus::Failed,
            ReleaseStatus::Superseded,
            ReleaseStatus::Uninstalled,
        ] {
            assert!(s.allows_upgrade(), "{} should allow", s);
        }
    }

    #[test]
    fn test_status_parsing_is_lenient() {
        assert_eq!(ReleaseStatus::from("pending-upgrade"), ReleaseStatus::PendingUpgrade);
        assert_eq!(ReleaseStatus::from("something-new"), ReleaseStatus::Unknown);
        let parsed: ReleaseStatus = serde_json::from_str("\"weird\"").unwrap();
        assert_eq!(parsed, ReleaseStatus::Unknown);
    }
}
