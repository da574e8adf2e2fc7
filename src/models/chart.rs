use std::path::PathBuf;

/// A chart ready to deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartState {
    /// Unpacked chart directory
    pub chart_path: PathBuf,
    /// Chart version
    pub revision: String,
    /// True when this version has not been attempted yet
    pub changed: bool,
}
