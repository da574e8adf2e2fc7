//! helmsync library
//!
//! A Kubernetes controller that keeps Helm releases in line with
//! HelmRelease records: it selects an action for each record, walks the
//! install/upgrade/test/rollback/uninstall state machine, composes values
//! from several sources and reports progress through status conditions.
//!
//! The binary wires the cluster-backed collaborators. With the `testing`
//! feature, `fake` provides in-memory ones so full reconcile passes can run
//! in tests.

pub mod cli;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod helm;
pub mod kube;
pub mod models;
pub mod retry;
pub mod status;
pub mod values;

pub use error::{Error, Result};
