// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a whole operation. Per-record problems are not errors;
/// they are counted as exclusions (see `process::extract::ExclusionCause` and
/// `index::ScoreSummary`).
#[derive(Debug, Error)]
pub enum EaiError {
    #[error("source data unavailable at {location}: {reason}")]
    SourceUnavailable { location: String, reason: String },

    #[error("source table schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("invalid tier thresholds: {0}")]
    InvalidThresholds(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no county-year records survived extraction and scoring")]
    NoRecords,

    #[error("store not found at {}; run `agency-index build` first", .0.display())]
    StoreMissing(PathBuf),

    #[error("store at {} is unreadable ({reason}); rerun `agency-index build`", path.display())]
    StoreCorrupt { path: PathBuf, reason: String },
}

impl EaiError {
    pub fn source_unavailable(location: impl ToString, reason: impl ToString) -> Self {
        EaiError::SourceUnavailable {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn store_corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        EaiError::StoreCorrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Find the first `EaiError` in an `anyhow` chain.
pub fn classify(err: &anyhow::Error) -> Option<&EaiError> {
    err.downcast_ref::<EaiError>()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<EaiError>()))
}
