//! Runtime configuration read from the environment (and `.env`, via dotenvy).

use std::path::PathBuf;
use thiserror::Error;

use crate::transcribe::{Language, ModelTier};

pub const DEFAULT_CHUNK_SECS: u64 = 600;
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Where staged input artifacts live until their job finishes
    pub upload_dir: PathBuf,
    /// Where rendered documents are written
    pub output_dir: PathBuf,
    /// Directory holding ggml model files
    pub models_dir: PathBuf,
    /// Preferred model tier; the first entry of the fallback chain
    pub model: ModelTier,
    /// Try lower tiers when the preferred one fails to load
    pub auto_downgrade: bool,
    /// Window length for chunked transcription, 0 disables chunking
    pub chunk_secs: u64,
    /// Language used when a submission does not name one
    pub default_language: Language,
    /// Inference threads (0 = all available cores)
    pub n_threads: usize,
    /// Download missing model files from Hugging Face
    pub download_models: bool,
    /// ffmpeg binary used to convert non-WAV inputs
    pub ffmpeg: PathBuf,
    /// Largest accepted input in bytes, 0 for no limit
    pub max_file_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("outputs"),
            models_dir: PathBuf::from("models").join("whisper"),
            model: ModelTier::Medium,
            auto_downgrade: true,
            chunk_secs: DEFAULT_CHUNK_SECS,
            default_language: Language::Auto,
            n_threads: 0,
            download_models: true,
            ffmpeg: PathBuf::from("ffmpeg"),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(dir) = lookup("SCRIBE_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("SCRIBE_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("SCRIBE_MODELS_DIR") {
            config.models_dir = PathBuf::from(dir);
        }
        if let Some(model) = lookup("SCRIBE_MODEL") {
            config.model = model.parse().map_err(|reason| ConfigError::Invalid {
                key: "SCRIBE_MODEL",
                value: model.clone(),
                reason,
            })?;
        }
        if let Some(value) = lookup("SCRIBE_AUTO_DOWNGRADE") {
            config.auto_downgrade = parse_bool("SCRIBE_AUTO_DOWNGRADE", &value)?;
        }
        if let Some(value) = lookup("SCRIBE_CHUNK_SECS") {
            config.chunk_secs = parse_number("SCRIBE_CHUNK_SECS", &value)?;
        }
        if let Some(value) = lookup("SCRIBE_LANGUAGE") {
            config.default_language = Language::from(value.as_str());
        }
        if let Some(value) = lookup("SCRIBE_THREADS") {
            config.n_threads = parse_number("SCRIBE_THREADS", &value)?;
        }
        if let Some(value) = lookup("SCRIBE_MODEL_DOWNLOAD") {
            config.download_models = parse_bool("SCRIBE_MODEL_DOWNLOAD", &value)?;
        }
        if let Some(path) = lookup("SCRIBE_FFMPEG") {
            config.ffmpeg = PathBuf::from(path);
        }
        if let Some(value) = lookup("SCRIBE_MAX_FILE_BYTES") {
            config.max_file_bytes = parse_number("SCRIBE_MAX_FILE_BYTES", &value)?;
        }

        Ok(config)
    }

    /// Create the upload and output directories if missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.upload_dir)?;
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
