use anyhow::Context as _;
use clap::Parser;
use dotenvy::dotenv;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod job;
mod output;
mod pipeline;
mod service;
mod transcribe;

use config::Config;
use job::{JobId, JobStatus};
use output::OutputFormat;
use service::{SubmitRequest, TranscriptionService};
use transcribe::{Language, ModelTier};

/// Transcribe audio and video files into PDF or DOCX documents.
#[derive(Parser, Debug)]
#[command(name = "scribe", version, about)]
struct Args {
    /// Input files (mp3, wav, flac, m4a, aac, ogg, wma, mp4, avi, mov, mkv, webm)
    files: Vec<PathBuf>,

    /// Output document format: pdf or docx
    #[arg(short, long, default_value = "pdf")]
    format: OutputFormat,

    /// Spoken language code, or "auto" to detect it
    #[arg(short, long)]
    language: Option<String>,

    /// Preferred model tier (tiny, base, small, medium, large)
    #[arg(short, long)]
    model: Option<ModelTier>,

    /// Wait for each file before submitting the next one
    #[arg(long)]
    sync: bool,

    /// Load the model before accepting any file
    #[arg(long)]
    preload: bool,

    /// Print service info as JSON and exit
    #[arg(long)]
    info: bool,
}

/// Keep a filename safe to use inside the upload directory.
fn sanitize_filename(name: &str) -> String {
    let safe: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();
    let safe = safe.trim_start_matches('.');
    if safe.is_empty() {
        "upload".to_string()
    } else {
        safe.to_string()
    }
}

/// Copy an input into the upload directory as `{timestamp}_{name}`.
fn stage(upload_dir: &Path, source: &Path) -> anyhow::Result<(PathBuf, String)> {
    let original = source
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{:?} has no usable file name", source))?
        .to_string();

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let staged = upload_dir.join(format!("{}_{}", timestamp, sanitize_filename(&original)));
    std::fs::copy(source, &staged)
        .with_context(|| format!("Failed to stage {:?} into {:?}", source, upload_dir))?;

    Ok((staged, original))
}

/// Remove a staged copy the worker never took ownership of.
fn discard_staged(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove staged file {:?}: {}", path, e);
        }
    }
}

async fn run_sync(service: &TranscriptionService, requests: Vec<SubmitRequest>) -> usize {
    let mut failed = 0;
    for request in requests {
        let staged = request.input_path.clone();
        let filename = request.original_filename.clone();
        match service.submit_sync(request).await {
            Ok(result) => {
                info!("{} -> {:?}", filename, result.download.path);
                let summary = serde_json::json!({
                    "id": result.id,
                    "file": filename,
                    "duration_secs": result.duration_secs,
                    "download": result.download,
                    "transcript": result.transcript.text,
                });
                println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());
            }
            Err(e) => {
                error!("{} failed: {}", filename, e);
                discard_staged(&staged);
                failed += 1;
            }
        }
    }
    failed
}

async fn run_async(service: &TranscriptionService, requests: Vec<SubmitRequest>) -> usize {
    let mut failed = 0;
    let mut ids: Vec<JobId> = Vec::new();

    for request in requests {
        let staged = request.input_path.clone();
        let filename = request.original_filename.clone();
        match service.submit_async(request) {
            Ok(id) => {
                info!("{} queued as job {}", filename, id);
                ids.push(id);
            }
            Err(e) => {
                error!("{} rejected: {}", filename, e);
                discard_staged(&staged);
                failed += 1;
            }
        }
    }

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut last_progress = vec![None; ids.len()];
    loop {
        interval.tick().await;

        let mut pending = 0;
        for (i, id) in ids.iter().enumerate() {
            let Ok(view) = service.status(*id) else { continue };
            if last_progress[i] != Some((view.status, view.progress)) {
                info!("Job {}: {} {}%", id, view.status, view.progress);
                last_progress[i] = Some((view.status, view.progress));
            }
            if !view.status.is_terminal() {
                pending += 1;
            }
        }
        if pending == 0 {
            break;
        }
    }

    for view in service.jobs() {
        if view.status == JobStatus::Error {
            failed += 1;
        }
        println!("{}", serde_json::to_string_pretty(&view).unwrap_or_default());
        if let Ok(download) = service.download(view.id) {
            info!("Job {} document: {:?}", view.id, download.path);
        }
    }
    failed
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(language) = &args.language {
        config.default_language = Language::from(language.as_str());
    }
    config
        .ensure_dirs()
        .context("Failed to create upload/output directories")?;
    let upload_dir = config.upload_dir.clone();

    let service = TranscriptionService::from_config(config);

    if args.preload {
        match service.preload().await {
            Ok(tier) => info!("Model {} preloaded", tier),
            Err(e) => warn!("Model preload failed, will retry on first job: {}", e),
        }
    }

    if args.info || args.files.is_empty() {
        println!("{}", serde_json::to_string_pretty(&service.info())?);
        service.shutdown().await;
        return Ok(());
    }

    let mut requests = Vec::with_capacity(args.files.len());
    for file in &args.files {
        let (input_path, original_filename) = stage(&upload_dir, file)?;
        requests.push(SubmitRequest {
            input_path,
            original_filename,
            format: args.format,
            language: None,
        });
    }

    let total = requests.len();
    let failed = if args.sync {
        run_sync(&service, requests).await
    } else {
        run_async(&service, requests).await
    };

    service.shutdown().await;

    if failed > 0 {
        anyhow::bail!("{} of {} files failed", failed, total);
    }
    info!("All {} files transcribed", total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("my talk (v2).mp3"), "mytalkv2.mp3");
        assert_eq!(sanitize_filename("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_filename("..."), "upload");
    }

    #[test]
    fn test_stage_prefixes_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip one.wav");
        std::fs::write(&source, b"data").unwrap();
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();

        let (staged, original) = stage(&uploads, &source).unwrap();
        assert_eq!(original, "clip one.wav");
        let name = staged.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_clipone.wav"));
        assert_eq!(name.len(), "YYYYmmdd_HHMMSS_clipone.wav".len());
        assert!(source.exists());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "scribe", "--format", "docx", "--model", "small", "--sync", "a.mp3",
        ])
        .unwrap();
        assert_eq!(args.format, OutputFormat::Docx);
        assert_eq!(args.model, Some(ModelTier::Small));
        assert!(args.sync);
        assert_eq!(args.files, vec![PathBuf::from("a.mp3")]);
        assert!(Args::try_parse_from(["scribe", "--format", "odt"]).is_err());
    }
}
