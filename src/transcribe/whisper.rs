use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{Language, ModelBackend, RawTranscription, Segment, SpeechModel, WHISPER_SAMPLE_RATE};
use crate::error::ScribeError;

/// Available Whisper model sizes, lowest quality first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelTier {
    /// Get the Hugging Face URL for this model
    pub fn hf_url(&self) -> String {
        format!(
            "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/{}",
            self.filename()
        )
    }

    /// Get the filename for this model
    pub fn filename(&self) -> &'static str {
        match self {
            ModelTier::Tiny => "ggml-tiny.bin",
            ModelTier::Base => "ggml-base.bin",
            ModelTier::Small => "ggml-small.bin",
            ModelTier::Medium => "ggml-medium.bin",
            ModelTier::Large => "ggml-large-v3.bin",
        }
    }

    /// Get approximate model size in MB
    pub fn size_mb(&self) -> u64 {
        match self {
            ModelTier::Tiny => 75,
            ModelTier::Base => 142,
            ModelTier::Small => 466,
            ModelTier::Medium => 1500,
            ModelTier::Large => 3100,
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelTier::Tiny => write!(f, "tiny"),
            ModelTier::Base => write!(f, "base"),
            ModelTier::Small => write!(f, "small"),
            ModelTier::Medium => write!(f, "medium"),
            ModelTier::Large => write!(f, "large"),
        }
    }
}

impl std::str::FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tiny" => Ok(ModelTier::Tiny),
            "base" => Ok(ModelTier::Base),
            "small" => Ok(ModelTier::Small),
            "medium" => Ok(ModelTier::Medium),
            "large" => Ok(ModelTier::Large),
            _ => Err(format!("Unknown model: {}. Use tiny, base, small, medium, or large", s)),
        }
    }
}

#[derive(Error, Debug)]
pub enum WhisperError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Model file missing: {0}")]
    Missing(PathBuf),
    #[error("Failed to download model: {0}")]
    Download(String),
    #[error("Failed to initialize Whisper: {0}")]
    Init(String),
    #[error("Transcription failed: {0}")]
    Transcription(String),
}

/// Get the path to a specific model file
pub fn model_path(models_dir: &Path, tier: ModelTier) -> PathBuf {
    models_dir.join(tier.filename())
}

/// Check if a model is already downloaded
fn is_model_downloaded(models_dir: &Path, tier: ModelTier) -> bool {
    // Accept anything at least half the expected size
    match fs::metadata(model_path(models_dir, tier)) {
        Ok(metadata) => metadata.len() >= tier.size_mb() * 1024 * 1024 / 2,
        Err(_) => false,
    }
}

/// Download a Whisper model from Hugging Face
pub fn download_model(models_dir: &Path, tier: ModelTier) -> Result<PathBuf, WhisperError> {
    let path = model_path(models_dir, tier);

    if is_model_downloaded(models_dir, tier) {
        debug!("Model {} already downloaded at {:?}", tier, path);
        return Ok(path);
    }

    fs::create_dir_all(models_dir)?;

    info!("Downloading Whisper {} model (~{}MB)...", tier, tier.size_mb());

    let url = tier.hf_url();
    let response = reqwest::blocking::Client::new()
        .get(&url)
        .send()
        .map_err(|e| WhisperError::Download(format!("HTTP request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(WhisperError::Download(format!(
            "HTTP {} from {}",
            response.status(),
            url
        )));
    }

    let pb = indicatif::ProgressBar::new(response.content_length().unwrap_or(0));
    if let Ok(style) = indicatif::ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }

    // Stream into a temp file so a broken download never looks complete
    let temp_path = path.with_extension("bin.tmp");
    let mut writer = BufWriter::new(File::create(&temp_path)?);
    let mut reader = pb.wrap_read(response);
    std::io::copy(&mut reader, &mut writer)
        .map_err(|e| WhisperError::Download(format!("Failed to read response: {}", e)))?;
    drop(writer);
    pb.finish_with_message("Download complete");

    fs::rename(&temp_path, &path)?;
    info!("Model downloaded to {:?}", path);

    Ok(path)
}

/// Loads ggml models from disk, downloading them first if allowed.
#[derive(Debug, Clone)]
pub struct WhisperBackend {
    models_dir: PathBuf,
    download: bool,
    /// Number of threads to use (0 = auto)
    n_threads: usize,
}

impl WhisperBackend {
    pub fn new(models_dir: impl Into<PathBuf>, download: bool, n_threads: usize) -> Self {
        Self {
            models_dir: models_dir.into(),
            download,
            n_threads,
        }
    }

    fn load_context(&self, tier: ModelTier) -> Result<WhisperHandle, WhisperError> {
        let path = if self.download {
            download_model(&self.models_dir, tier)?
        } else {
            let path = model_path(&self.models_dir, tier);
            if !path.exists() {
                return Err(WhisperError::Missing(path));
            }
            path
        };

        info!("Loading Whisper {} model from {:?}...", tier, path);

        let path_str = path
            .to_str()
            .ok_or_else(|| WhisperError::Init(format!("Non UTF-8 model path: {:?}", path)))?;
        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| WhisperError::Init(format!("Failed to load model: {}", e)))?;

        let n_threads = if self.n_threads > 0 {
            self.n_threads
        } else {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        };

        info!("Whisper {} model loaded (using {} threads)", tier, n_threads);

        Ok(WhisperHandle {
            ctx,
            tier,
            n_threads: n_threads as i32,
        })
    }
}

impl ModelBackend for WhisperBackend {
    fn load(&self, tier: ModelTier) -> Result<Arc<dyn SpeechModel>, String> {
        self.load_context(tier)
            .map(|handle| Arc::new(handle) as Arc<dyn SpeechModel>)
            .map_err(|e| e.to_string())
    }
}

/// A loaded whisper.cpp context
pub struct WhisperHandle {
    ctx: WhisperContext,
    tier: ModelTier,
    n_threads: i32,
}

impl WhisperHandle {
    fn run(&self, samples: &[f32], language: &Language) -> Result<RawTranscription, WhisperError> {
        let start_time = std::time::Instant::now();
        let audio_secs = samples.len() as f32 / WHISPER_SAMPLE_RATE as f32;

        // Greedy sampling; beam search is 2-3x slower
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_n_threads(self.n_threads);
        params.set_token_timestamps(false);

        // Hallucination guards
        params.set_no_speech_thold(0.6);
        params.set_entropy_thold(2.4);
        params.set_logprob_thold(-1.0);
        params.set_temperature(0.0);
        params.set_temperature_inc(0.2);
        params.set_no_context(true);
        params.set_suppress_non_speech_tokens(true);

        params.set_language(Some(language.as_str()));
        params.set_translate(false);

        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_print_special(false);

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| WhisperError::Transcription(format!("Failed to create state: {}", e)))?;

        state
            .full(params, samples)
            .map_err(|e| WhisperError::Transcription(format!("Inference failed: {}", e)))?;

        let num_segments = state
            .full_n_segments()
            .map_err(|e| WhisperError::Transcription(format!("Failed to get segments: {}", e)))?;

        let mut segments = Vec::new();
        let mut text = String::new();

        let mut last_text: Option<String> = None;
        let mut repeat_count = 0;
        const MAX_REPEATS: usize = 2;

        for i in 0..num_segments {
            let start_ts = state
                .full_get_segment_t0(i)
                .map_err(|e| WhisperError::Transcription(format!("Failed to get start time: {}", e)))?;
            let end_ts = state
                .full_get_segment_t1(i)
                .map_err(|e| WhisperError::Transcription(format!("Failed to get end time: {}", e)))?;
            let segment_text = state
                .full_get_segment_text(i)
                .map_err(|e| WhisperError::Transcription(format!("Failed to get text: {}", e)))?;

            let segment_text = segment_text.trim().to_string();
            if segment_text.is_empty() {
                continue;
            }

            // Repeated identical segments are a hallucination symptom
            if last_text.as_deref() == Some(segment_text.as_str()) {
                repeat_count += 1;
                if repeat_count >= MAX_REPEATS {
                    continue;
                }
            } else {
                repeat_count = 0;
            }
            last_text = Some(segment_text.clone());

            // Timestamps are in centiseconds
            segments.push(Segment {
                start: start_ts as f64 / 100.0,
                end: end_ts as f64 / 100.0,
                text: segment_text.clone(),
            });

            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&segment_text);
        }

        let elapsed = start_time.elapsed();
        info!(
            "Transcribed {:.1}s with {} in {:.1}s ({:.1}x realtime): {} segments",
            audio_secs,
            self.tier,
            elapsed.as_secs_f32(),
            audio_secs / elapsed.as_secs_f32().max(f32::EPSILON),
            segments.len()
        );

        Ok(RawTranscription { text, segments })
    }
}

impl SpeechModel for WhisperHandle {
    fn transcribe(
        &self,
        samples: &[f32],
        language: &Language,
    ) -> Result<RawTranscription, ScribeError> {
        self.run(samples, language)
            .map_err(|e| ScribeError::TranscriptionFailed(e.to_string()))
    }
}
