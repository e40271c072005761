//! Fatal installer errors.
//!
//! Anything that should stop the run with a non-zero exit status is one of
//! these. Transient cluster state and best-effort steps never produce them;
//! those paths log a warning and carry on.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("{tool} is not installed or not configured properly: {stderr}")]
    MissingTool { tool: String, stderr: String },

    #[error("kubeconfig {path} is not usable: {reason}")]
    InvalidKubeconfig { path: PathBuf, reason: String },

    #[error("at least {required} nodes are required, the cluster has {found}; add more nodes and try again")]
    InsufficientNodes { found: usize, required: usize },

    #[error("you must agree to the license terms to proceed")]
    LicenseDeclined,

    #[error("{step} failed: {stderr}")]
    StepFailed { step: String, stderr: String },

    #[error("operator input closed")]
    InputClosed,
}

impl InstallError {
    pub fn step(step: impl Into<String>, stderr: impl Into<String>) -> Self {
        InstallError::StepFailed {
            step: step.into(),
            stderr: stderr.into(),
        }
    }
}
