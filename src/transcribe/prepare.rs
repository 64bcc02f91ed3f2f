use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use crate::error::ScribeError;

/// Whisper's required sample rate
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Decoded audio ready for the model: mono, 16kHz, normalized to [-1.0, 1.0]
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    /// Duration in seconds
    pub duration_secs: f64,
}

impl Waveform {
    pub fn from_samples(samples: Vec<f32>) -> Self {
        let duration_secs = samples.len() as f64 / WHISPER_SAMPLE_RATE as f64;
        Self { samples, duration_secs }
    }

    /// Samples between `start_secs` and `end_secs`, `None` if out of range.
    pub fn slice(&self, start_secs: f64, end_secs: f64) -> Option<&[f32]> {
        if start_secs < 0.0 || end_secs < start_secs {
            return None;
        }
        let rate = WHISPER_SAMPLE_RATE as f64;
        let start = (start_secs * rate).round() as usize;
        let end = ((end_secs * rate).round() as usize).min(self.samples.len());
        if start >= end {
            return None;
        }
        Some(&self.samples[start..end])
    }
}

/// Turns an input artifact into a [`Waveform`].
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<Waveform, ScribeError>;
}

/// Reads WAV directly and hands every other container to ffmpeg.
#[derive(Debug, Clone)]
pub struct WavDecoder {
    ffmpeg: PathBuf,
}

impl WavDecoder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self { ffmpeg: ffmpeg.into() }
    }

    /// Whether the configured ffmpeg binary can be executed.
    pub fn ffmpeg_available(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn convert_with_ffmpeg(&self, path: &Path) -> Result<Waveform, ScribeError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("input");
        let temp_wav = path.with_file_name(format!("{}_temp.wav", stem));

        let output = Command::new(&self.ffmpeg)
            .arg("-i")
            .arg(path)
            .args(["-ar", "16000", "-ac", "1", "-y"])
            .arg(&temp_wav)
            .stdout(Stdio::null())
            .output()
            .map_err(|e| {
                ScribeError::UnsupportedFormat(format!(
                    "ffmpeg is required to decode {} ({})",
                    path.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let _ = std::fs::remove_file(&temp_wav);
            return Err(ScribeError::UnsupportedFormat(format!(
                "ffmpeg could not decode {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!("Converted {:?} to temporary WAV {:?}", path, temp_wav);
        let result = read_wav(&temp_wav);

        if let Err(e) = std::fs::remove_file(&temp_wav) {
            warn!("Failed to remove temporary WAV {:?}: {}", temp_wav, e);
        }

        result
    }
}

impl Default for WavDecoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl AudioDecoder for WavDecoder {
    fn decode(&self, path: &Path) -> Result<Waveform, ScribeError> {
        // Surface missing files and permission problems before anything else
        File::open(path).map_err(|e| ScribeError::from_input_io(path, &e))?;

        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));

        let waveform = if is_wav {
            debug!("WAV input detected, reading directly");
            read_wav(path)?
        } else {
            self.convert_with_ffmpeg(path)?
        };

        info!(
            "Decoded {:?}: {} samples ({:.1}s)",
            path,
            waveform.samples.len(),
            waveform.duration_secs
        );

        Ok(waveform)
    }
}

/// Read a WAV file, down-mixing and resampling to 16kHz mono
fn read_wav(path: &Path) -> Result<Waveform, ScribeError> {
    let unsupported =
        |e: hound::Error| ScribeError::UnsupportedFormat(format!("{}: {}", path.display(), e));

    let mut reader = hound::WavReader::open(path).map_err(unsupported)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(unsupported)?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(unsupported)?
        }
    };

    let mono = downmix(&interleaved, spec.channels as usize);
    let samples = resample_linear(&mono, spec.sample_rate, WHISPER_SAMPLE_RATE);

    Ok(Waveform::from_samples(samples))
}

/// Average interleaved channels into one
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resampler
fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio).floor() as usize;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}
