//! Turning a finished transcript into a downloadable document.

mod docx;
mod pdf;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ScribeError;
use crate::job::Job;
use crate::transcribe::RawTranscription;

pub const DOCUMENT_TITLE: &str = "Audio Transcription";

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Pdf,
    Docx,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 2] = [OutputFormat::Pdf, OutputFormat::Docx];

    /// Get file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Docx => "docx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = ScribeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pdf" => Ok(OutputFormat::Pdf),
            "docx" => Ok(OutputFormat::Docx),
            other => Err(ScribeError::UnsupportedFormat(format!(
                "output format must be \"pdf\" or \"docx\", got {:?}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Metadata printed above the transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMetadata {
    pub filename: String,
    /// Submission timestamp, `%Y%m%d_%H%M%S`
    pub timestamp: String,
    /// End of the last segment, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl DocumentMetadata {
    pub fn for_job(job: &Job, transcription: &RawTranscription) -> Self {
        Self {
            filename: job.original_filename.clone(),
            timestamp: job.timestamp(),
            duration_secs: transcription.segments.last().map(|s| s.end),
        }
    }

    /// Lines shown under the title by both renderers
    fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!(
                "Transcription date: {}",
                chrono::Local::now().format("%d/%m/%Y %H:%M:%S")
            ),
            format!("Original file: {}", self.filename),
            format!("Submitted: {}", self.timestamp),
        ];
        if let Some(duration) = self.duration_secs {
            lines.push(format!("Duration: {:.2} seconds", duration));
        }
        lines
    }
}

/// Non-empty paragraphs of a transcript
fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').map(str::trim).filter(|p| !p.is_empty())
}

/// Writes a document for a transcript at `path` and returns where it landed.
pub trait DocumentRenderer: Send + Sync {
    fn render(
        &self,
        text: &str,
        metadata: &DocumentMetadata,
        format: OutputFormat,
        path: &Path,
    ) -> Result<PathBuf, ScribeError>;
}

/// Built-in PDF and DOCX writer
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentWriter;

impl DocumentRenderer for DocumentWriter {
    fn render(
        &self,
        text: &str,
        metadata: &DocumentMetadata,
        format: OutputFormat,
        path: &Path,
    ) -> Result<PathBuf, ScribeError> {
        match format {
            OutputFormat::Pdf => pdf::write_pdf(path, text, metadata)?,
            OutputFormat::Docx => docx::write_docx(path, text, metadata)?,
        }
        info!("{} created: {:?}", format.extension().to_uppercase(), path);
        Ok(path.to_path_buf())
    }
}

/// Remove whatever a failed render left behind.
fn discard_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => warn!("Removed partial document {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial document {:?}: {}", path, e),
    }
}

/// Where and under which name a rendered document was stored
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedOutput {
    pub path: PathBuf,
    pub download_name: String,
}

pub struct OutputManager {
    output_dir: PathBuf,
    renderer: Arc<dyn DocumentRenderer>,
}

impl OutputManager {
    pub fn new(output_dir: impl Into<PathBuf>, renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self {
            output_dir: output_dir.into(),
            renderer,
        }
    }

    pub fn write(
        &self,
        job: &Job,
        transcription: &RawTranscription,
    ) -> Result<RenderedOutput, ScribeError> {
        let metadata = DocumentMetadata::for_job(job, transcription);
        let ext = job.format.extension();
        let download_name = format!("{}_transcription.{}", job.timestamp(), ext);
        // Job id keeps same-second submissions apart on disk
        let path = self.output_dir.join(format!(
            "{}_{}_transcription.{}",
            job.timestamp(),
            job.id.simple(),
            ext
        ));

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| ScribeError::RenderFailed(format!("{:?}: {}", self.output_dir, e)))?;

        match self
            .renderer
            .render(&transcription.text, &metadata, job.format, &path)
        {
            Ok(path) => Ok(RenderedOutput { path, download_name }),
            Err(e) => {
                discard_partial(&path);
                Err(e)
            }
        }
    }
}
