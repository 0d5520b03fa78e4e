use std::path::PathBuf;

use thiserror::Error;

/// Failure kinds raised by the engine and its collaborators.
///
/// Only [`EngineError::DependencyUnavailable`] and [`EngineError::Cancelled`]
/// ever escape [`crate::process`]; everything else is folded into a failed
/// [`crate::RenameOutcome`] for the file, video or batch it affected.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required external tool is missing or unusable.
    #[error("{tool} is not available: {reason}")]
    DependencyUnavailable { tool: String, reason: String },

    /// The file could not be probed, or has no video stream.
    #[error("failed to probe {path}: {reason}")]
    Probe { path: PathBuf, reason: String },

    /// Frame extraction failed for one video.
    #[error("failed to extract frames from {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    /// The analysis service call failed (network, auth, quota, ...).
    #[error("analysis failed: {0}")]
    Analysis(String),

    /// Moving or copying a single file failed.
    #[error("failed to rename {path}: {reason}")]
    Rename { path: PathBuf, reason: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn probe(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Probe {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn extraction(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Extraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn rename(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Rename {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DependencyUnavailable { .. } | Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
