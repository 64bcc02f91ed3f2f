//! Splits long inputs into fixed windows and stitches the results back
//! together on the absolute timeline.

use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use super::{Language, RawTranscription, Segment, SpeechModel, Waveform};
use crate::error::ScribeError;

/// Transcript used when the model recognized nothing
pub const NO_SPEECH_SENTINEL: &str = "no speech detected";

/// A slice of the input timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    /// Window index (0-based)
    pub index: usize,
    pub start_secs: f64,
    pub end_secs: f64,
}

impl Window {
    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

/// Progress after a finished window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub percent: u8,
    pub current_chunk: usize,
    pub total_chunks: usize,
}

impl Progress {
    fn after_window(done: usize, total: usize) -> Self {
        // 100 is reserved for the finished job
        let percent = (done * 100 / total.max(1)).min(99) as u8;
        Self {
            percent,
            current_chunk: done,
            total_chunks: total,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum WindowError {
    #[error("Window {index} ({start:.1}s - {end:.1}s) lies outside the decoded audio")]
    OutOfRange { index: usize, start: f64, end: f64 },
}

/// Cut `duration_secs` into consecutive windows of `window_secs`; the last may be shorter.
pub fn plan_windows(duration_secs: f64, window_secs: f64) -> Vec<Window> {
    if window_secs <= 0.0 || duration_secs <= 0.0 {
        return Vec::new();
    }

    let count = (duration_secs / window_secs).ceil() as usize;
    (0..count)
        .map(|index| Window {
            index,
            start_secs: index as f64 * window_secs,
            end_secs: ((index + 1) as f64 * window_secs).min(duration_secs),
        })
        .collect()
}

/// Pair every planned window with its samples, failing if any cannot be cut.
fn slice_windows(
    waveform: &Waveform,
    window_secs: f64,
) -> Result<Vec<(Window, &[f32])>, WindowError> {
    plan_windows(waveform.duration_secs, window_secs)
        .into_iter()
        .map(|window| {
            waveform
                .slice(window.start_secs, window.end_secs)
                .map(|samples| (window, samples))
                .ok_or(WindowError::OutOfRange {
                    index: window.index,
                    start: window.start_secs,
                    end: window.end_secs,
                })
        })
        .collect()
}

/// Transcribe a waveform, chunking it when it exceeds `chunk_secs` (0 disables chunking).
pub fn transcribe_waveform(
    model: &dyn SpeechModel,
    waveform: &Waveform,
    language: &Language,
    chunk_secs: u64,
    on_progress: &mut dyn FnMut(Progress),
) -> Result<RawTranscription, ScribeError> {
    let threshold = chunk_secs as f64;

    let result = if chunk_secs == 0 || waveform.duration_secs <= threshold {
        transcribe_whole(model, waveform, language)?
    } else {
        match slice_windows(waveform, threshold) {
            Ok(windows) => transcribe_windows(model, &windows, language, on_progress)?,
            Err(e) => {
                warn!("Chunk setup failed ({}), transcribing in a single pass", e);
                transcribe_whole(model, waveform, language)?
            }
        }
    };

    Ok(with_sentinel(result))
}

fn transcribe_whole(
    model: &dyn SpeechModel,
    waveform: &Waveform,
    language: &Language,
) -> Result<RawTranscription, ScribeError> {
    info!(
        "Transcribing {:.1}s in a single pass (language {})",
        waveform.duration_secs, language
    );
    model.transcribe(&waveform.samples, language)
}

fn transcribe_windows(
    model: &dyn SpeechModel,
    windows: &[(Window, &[f32])],
    language: &Language,
    on_progress: &mut dyn FnMut(Progress),
) -> Result<RawTranscription, ScribeError> {
    let total = windows.len();
    info!("Transcribing {} chunks sequentially", total);

    let mut texts = Vec::with_capacity(total);
    let mut segments: Vec<Segment> = Vec::new();

    for (window, samples) in windows {
        info!(
            "Chunk {}/{}: {:.1}s - {:.1}s ({:.1}s)",
            window.index + 1,
            total,
            window.start_secs,
            window.end_secs,
            window.duration_secs()
        );

        let started = Instant::now();
        let part = model.transcribe(samples, language).map_err(|e| match e {
            ScribeError::TranscriptionFailed(msg) => ScribeError::TranscriptionFailed(format!(
                "chunk {}/{}: {}",
                window.index + 1,
                total,
                msg
            )),
            other => other,
        })?;

        let elapsed = started.elapsed().as_secs_f64();
        info!(
            "Chunk {}/{} done in {:.1}s ({:.1}x realtime)",
            window.index + 1,
            total,
            elapsed,
            window.duration_secs() / elapsed.max(f64::EPSILON)
        );

        // Rebase onto the absolute timeline, never spilling out of the window
        segments.extend(part.segments.iter().map(|s| {
            let mut shifted = s.shifted(window.start_secs);
            shifted.start = shifted.start.clamp(window.start_secs, window.end_secs);
            shifted.end = shifted.end.clamp(shifted.start, window.end_secs);
            shifted
        }));
        texts.push(part.text.trim().to_string());

        // The last window is reported as 100 when the job completes
        let done = window.index + 1;
        if done < total {
            on_progress(Progress::after_window(done, total));
        }
    }

    Ok(RawTranscription {
        text: texts.join("\n"),
        segments,
    })
}

fn with_sentinel(mut result: RawTranscription) -> RawTranscription {
    if result.text.trim().is_empty() {
        warn!("Transcription is empty, the input may contain no speech");
        result.text = NO_SPEECH_SENTINEL.to_string();
    }
    result
}
