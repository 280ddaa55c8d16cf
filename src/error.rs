use std::path::PathBuf;

use thiserror::Error;

/// The error type for `burn-hrnet` operations.
///
/// Graph-assembly shape mismatches are programming errors and surface as
/// panics at construction time; everything a caller can plausibly get wrong
/// (configuration values, checkpoint files) goes through this enum.
#[derive(Error, Debug)]
pub enum HrnetError {
    /// The experiment configuration is logically inconsistent.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// A checkpoint file required by the configured run mode does not exist.
    /// There is no fallback to random initialization.
    #[error("checkpoint not found: {path}")]
    CheckpointNotFound { path: PathBuf },

    /// A checkpoint file exists but could not be deserialized into the model.
    #[error("failed to load weights from {path}: {reason}")]
    WeightLoading { path: PathBuf, reason: String },

    /// Writing a checkpoint file failed.
    #[error("failed to save weights to {path}: {reason}")]
    WeightSaving { path: PathBuf, reason: String },
}

/// A specialized `Result` type for `burn-hrnet` operations.
pub type HrnetResult<T> = Result<T, HrnetError>;
