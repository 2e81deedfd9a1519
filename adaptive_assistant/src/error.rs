//! Error taxonomy for the routing core.
//!
//! Provider faults and learning-store faults are contained where they occur
//! and reported as data; these types give them a name and a display form.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Faults raised while loading or persisting the learning table.
#[derive(Error, Debug)]
pub enum LearningStoreError {
    #[error("learning state at {path:?} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to persist learning state: {0}")]
    Persist(String),

    #[error("learning storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("learning storage backend error: {0}")]
    Backend(String),
}

impl From<sled::Error> for LearningStoreError {
    fn from(err: sled::Error) -> Self {
        LearningStoreError::Backend(err.to_string())
    }
}

/// Why a single provider invocation did not succeed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionFault {
    #[error("{0}")]
    Failed(String),

    #[error("provider timed out after {0:?}")]
    TimedOut(Duration),

    #[error("provider panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    ReportedFailure(String),
}

impl ExecutionFault {
    /// Stable label recorded under the `fault` metadata key.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionFault::Failed(_) => "failed",
            ExecutionFault::TimedOut(_) => "timed_out",
            ExecutionFault::Panicked(_) => "panicked",
            ExecutionFault::ReportedFailure(_) => "reported_failure",
        }
    }
}
