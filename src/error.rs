use thiserror::Error;

use crate::types::JobId;

/// Central error type for the stem-mixer-core crate.
#[derive(Debug, Error)]
pub enum StemError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    // Domain-specific variants
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Separation job {0} is still running")]
    Busy(JobId),

    #[error("Separation engine failed: {0}")]
    EngineFailure(String),

    #[error("I/O failure: {0}")]
    IoFailure(String),

    #[error("Gain vector has {gains} entries but there are {stems} stems")]
    ShapeMismatch { stems: usize, gains: usize },

    #[error("Stem `{stem}` is {found}, expected {expected}")]
    FormatMismatch {
        stem: String,
        expected: String,
        found: String,
    },

    #[error("Gain index {index} out of range for {len} stems")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("No stems loaded")]
    NoStemsLoaded,
}

// --- Implement From conversions for common errors ---
impl From<std::io::Error> for StemError {
    fn from(e: std::io::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<serde_json::Error> for StemError {
    fn from(e: serde_json::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<hound::Error> for StemError {
    fn from(e: hound::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<symphonia::core::errors::Error> for StemError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

pub type Result<T> = std::result::Result<T, StemError>;
