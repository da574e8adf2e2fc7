//! Actions the reconciliation engine can take on a release

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Do nothing this pass
    Skip,
    Install,
    Upgrade,
    /// Render an upgrade without applying it and compare against the live release
    DryRunCompare,
    Test,
    Rollback,
    Uninstall,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Skip => "skip",
            Action::Install => "install",
            Action::Upgrade => "upgrade",
            Action::DryRunCompare => "dry-run-compare",
            Action::Test => "test",
            Action::Rollback => "rollback",
            Action::Uninstall => "uninstall",
        }
    }

    /// True for actions that change the release store.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Action::Install | Action::Upgrade | Action::Rollback | Action::Uninstall
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
