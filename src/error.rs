//! Error types for helmsync

use std::fmt;

use thiserror::Error;

/// Main error type for reconciliation operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A release or values source does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency conflict on a status write
    #[error("conflict: {0}")]
    Conflict(String),

    /// The live release is in a state that forbids acting on it
    #[error("{0}")]
    DisallowedStatus(String),

    /// Validation error for HelmRelease specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Values composition error
    #[error("values error: {0}")]
    Values(String),

    /// Error reported by the Helm release store or binary
    #[error("helm error: {0}")]
    Helm(String),

    /// Chart could not be fetched
    #[error("chart error: {0}")]
    Chart(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem or process I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error while fetching a remote values document
    #[error("http error: {0}")]
    Http(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Several failures collected during one reconcile pass
    #[error("{0}")]
    Aggregate(ErrorCollection),

    /// Finalizer bookkeeping failed
    #[error("finalizer error: {0}")]
    Finalizer(String),

    /// Unexpected internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn values(msg: impl Into<String>) -> Self {
        Self::Values(msg.into())
    }

    pub fn helm(msg: impl Into<String>) -> Self {
        Self::Helm(msg.into())
    }

    pub fn chart(msg: impl Into<String>) -> Self {
        Self::Chart(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for write conflicts, including those reported by the API server as HTTP 409.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Kube(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }

    /// True when the target object does not exist, including API server 404s.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Ordered list of errors gathered while walking the action table.
///
/// Displayed most recent first, each older entry prefixed with
/// `", previous error: "`.
#[derive(Debug, Default)]
pub struct ErrorCollection {
    errors: Vec<Error>,
}

impl ErrorCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: Error) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Errors from most recent to oldest.
    pub fn iter_recent_first(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter().rev()
    }

    /// Collapse into a single result: `Ok` when nothing failed, the lone
    /// error when there is one, otherwise an aggregate.
    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Aggregate(self)),
        }
    }
}

impl fmt::Display for ErrorCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.iter_recent_first().enumerate() {
            if i > 0 {
                f.write_str(", previous error: ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_renders_most_recent_first() {
        let mut errs = ErrorCollection::new();
        errs.push(Error::helm("install failed"));
        errs.push(Error::helm("uninstall failed"));

        assert_eq!(
            errs.to_string(),
            "helm error: uninstall failed, previous error: helm error: install failed"
        );
    }

    #[test]
    fn test_collection_into_result() {
        assert!(ErrorCollection::new().into_result().is_ok());

        let mut one = ErrorCollection::new();
        one.push(Error::validation("chart.name is required"));
        match one.into_result() {
            Err(Error::Validation(msg)) => assert_eq!(msg, "chart.name is required"),
            other => panic!("expected lone validation error, got {:?}", other),
        }

        let mut two = ErrorCollection::new();
        two.push(Error::helm("a"));
        two.push(Error::helm("b"));
        assert!(matches!(two.into_result(), Err(Error::Aggregate(c)) if c.len() == 2));
    }

    #[test]
    fn test_conflict_and_not_found_classification() {
        assert!(Error::conflict("stale resourceVersion").is_conflict());
        assert!(!Error::helm("boom").is_conflict());
        assert!(Error::not_found("release web").is_not_found());

        let api_conflict = Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        }));
        assert!(api_conflict.is_conflict());
        assert!(!api_conflict.is_not_found());
    }
}
