use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::job::{JobId, JobStatus};
use crate::transcribe::ModelTier;

/// A single failed load attempt, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierFailure {
    pub tier: ModelTier,
    pub reason: String,
}

impl fmt::Display for TierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tier, self.reason)
    }
}

/// Failure list rendered as `tier: reason; tier: reason`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierFailures(pub Vec<TierFailure>);

impl TierFailures {
    pub fn tiers(&self) -> Vec<ModelTier> {
        self.0.iter().map(|f| f.tier).collect()
    }
}

impl fmt::Display for TierFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Error, Debug, Clone)]
pub enum ScribeError {
    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),
    #[error("No read permission for: {0}")]
    PermissionDenied(PathBuf),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("File too large: {size} bytes (limit {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },
    #[error("No model could be loaded ({0})")]
    ModelUnavailable(TierFailures),
    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),
    #[error("Failed to render document: {0}")]
    RenderFailed(String),
    #[error("Job not found: {0}")]
    JobNotFound(JobId),
    #[error("Job {id} has no result yet (status {status})")]
    JobNotReady { id: JobId, status: JobStatus },
    #[error("Transcription service is shutting down")]
    ShuttingDown,
}

impl ScribeError {
    /// Classify an I/O error raised while touching an input artifact.
    pub fn from_input_io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => ScribeError::InputNotFound(path),
            std::io::ErrorKind::PermissionDenied => ScribeError::PermissionDenied(path),
            _ => ScribeError::UnsupportedFormat(format!("{}: {}", path.display(), err)),
        }
    }
}
