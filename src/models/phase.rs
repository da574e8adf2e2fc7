//! Lifecycle phases of a HelmRelease
//!
//! The phase is a coarse label for the most recent action outcome. Each phase
//! maps to one or two conditions; see `status::conditions`.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    Installing,
    Upgrading,
    Deployed,
    DeployFailed,
    Testing,
    Succeeded,
    Failed,
    TestFailed,
    RollingBack,
    RolledBack,
    RollbackFailed,
    ChartFetched,
    ChartFetchFailed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Installing => "Installing",
            Phase::Upgrading => "Upgrading",
            Phase::Deployed => "Deployed",
            Phase::DeployFailed => "DeployFailed",
            Phase::Testing => "Testing",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
            Phase::TestFailed => "TestFailed",
            Phase::RollingBack => "RollingBack",
            Phase::RolledBack => "RolledBack",
            Phase::RollbackFailed => "RollbackFailed",
            Phase::ChartFetched => "ChartFetched",
            Phase::ChartFetchFailed => "ChartFetchFailed",
        }
    }

    pub fn all() -> &'static [Self] {
        &[
            Phase::Installing,
            Phase::Upgrading,
            Phase::Deployed,
            Phase::DeployFailed,
            Phase::Testing,
            Phase::Succeeded,
            Phase::Failed,
            Phase::TestFailed,
            Phase::RollingBack,
            Phase::RolledBack,
            Phase::RollbackFailed,
            Phase::ChartFetched,
            Phase::ChartFetchFailed,
        ]
    }

    /// True for phases that report a failed outcome.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Phase::DeployFailed
                | Phase::Failed
                | Phase::TestFailed
                | Phase::RollbackFailed
                | Phase::ChartFetchFailed
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| crate::Error::validation(format!("unknown phase: {}", s)))
    }
}
