mod chunked;
mod loader;
mod prepare;
mod whisper;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::ScribeError;

pub use chunked::{
    NO_SPEECH_SENTINEL, Progress, Window, WindowError, plan_windows, transcribe_waveform,
};
pub use loader::{FALLBACK_ALTERNATES, FallbackChain, LoadedModel, ModelLoader};
pub use prepare::{AudioDecoder, WHISPER_SAMPLE_RATE, WavDecoder, Waveform};
#[cfg(test)]
pub(crate) use loader::tests::CountingBackend;
pub use whisper::{ModelTier, WhisperBackend, WhisperError, download_model, model_path};

/// Language hint passed to the model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    /// Let the model detect the spoken language
    #[default]
    Auto,
    /// Force a language code, e.g. "es" or "en"
    Code(String),
}

impl Language {
    pub fn as_str(&self) -> &str {
        match self {
            Language::Auto => "auto",
            Language::Code(code) => code,
        }
    }

    /// The code to force on the model, `None` when detection is requested.
    pub fn forced(&self) -> Option<&str> {
        match self {
            Language::Auto => None,
            Language::Code(code) => Some(code),
        }
    }
}

impl From<&str> for Language {
    fn from(s: &str) -> Self {
        let s = s.trim().to_lowercase();
        if s.is_empty() || s == "auto" {
            Language::Auto
        } else {
            Language::Code(s)
        }
    }
}

impl From<String> for Language {
    fn from(s: String) -> Self {
        Language::from(s.as_str())
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        language.as_str().to_string()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single transcribed segment with timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// The transcribed text
    pub text: String,
}

impl Segment {
    /// Copy of this segment moved later by `offset` seconds.
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
            text: self.text.clone(),
        }
    }
}

/// What one model call returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTranscription {
    pub text: String,
    pub segments: Vec<Segment>,
}

/// A loaded model able to transcribe 16 kHz mono samples.
pub trait SpeechModel: Send + Sync {
    fn transcribe(
        &self,
        samples: &[f32],
        language: &Language,
    ) -> Result<RawTranscription, ScribeError>;
}

/// Loads a model for a tier. Errors are plain reasons, collected by the loader.
pub trait ModelBackend: Send + Sync {
    fn load(&self, tier: ModelTier) -> Result<Arc<dyn SpeechModel>, String>;
}
