//! Jobs, their registry and the single-consumer worker that runs them.

mod registry;
mod worker;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::output::OutputFormat;
use crate::transcribe::Language;

pub use registry::JobRegistry;
pub use worker::{QueueHandle, Reply, Worker, WorkerHandle};
pub(crate) use worker::remove_input;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Compact form used in artifact file names
    pub fn simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// PENDING -> PROCESSING -> DONE | ERROR, nothing else.
    pub fn can_become(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Error)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Done => "DONE",
            JobStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One submitted transcription request
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// 0-100, reaches 100 only when DONE
    pub progress: u8,
    pub format: OutputFormat,
    pub language: Language,
    /// Handed out once for cleanup, then cleared
    pub input_path: Option<PathBuf>,
    pub original_filename: String,
    pub submitted_at: DateTime<Local>,
    pub output_path: Option<PathBuf>,
    pub download_name: Option<String>,
    pub error: Option<String>,
    /// Free-form progress details, e.g. current/total chunk
    pub progress_meta: serde_json::Map<String, serde_json::Value>,
}

impl Job {
    pub fn new(
        input_path: PathBuf,
        original_filename: impl Into<String>,
        format: OutputFormat,
        language: Language,
    ) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            progress: 0,
            format,
            language,
            input_path: Some(input_path),
            original_filename: original_filename.into(),
            submitted_at: Local::now(),
            output_path: None,
            download_name: None,
            error: None,
            progress_meta: serde_json::Map::new(),
        }
    }

    /// Submission time as used in file names
    pub fn timestamp(&self) -> String {
        self.submitted_at.format("%Y%m%d_%H%M%S").to_string()
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id,
            status: self.status,
            progress: self.progress,
            format: self.format,
            language: self.language.clone(),
            original_filename: self.original_filename.clone(),
            submitted_at: self.submitted_at,
            download_name: self.download_name.clone(),
            error: self.error.clone(),
            progress_meta: self.progress_meta.clone(),
        }
    }
}

/// Status snapshot safe to hand to clients: no filesystem paths.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub format: OutputFormat,
    pub language: Language,
    pub original_filename: String,
    pub submitted_at: DateTime<Local>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub progress_meta: serde_json::Map<String, serde_json::Value>,
}
