//! helmsync model layer
//!
//! Structure:
//! - `helm_release.rs` - HelmRelease CRD (spec, status, defaults, validation)
//! - `condition.rs` / `phase.rs` - status vocabulary
//! - `action.rs` - engine actions
//! - `chart.rs` - fetched chart handed to the engine
//! - `values.rs` - recursive values documents
//! - `duration.rs` - duration strings

pub mod action;
pub mod chart;
pub mod condition;
pub mod duration;
pub mod helm_release;
pub mod phase;
pub mod values;

pub use action::Action;
pub use chart::ChartState;
pub use condition::{Condition, ConditionStatus, ConditionType};
pub use helm_release::{
    ChartSpec, HelmRelease, HelmReleaseSpec, HelmReleaseStatus, ReleaseDefaults, RollbackPolicy,
    TestPolicy, ValuesPolicy, ValuesReference, ValuesSourceKind,
};
pub use phase::Phase;
pub use values::Values;
