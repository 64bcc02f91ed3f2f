//! One job, end to end: input check, model, decode, transcribe, render.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::error::ScribeError;
use crate::job::Job;
use crate::output::OutputManager;
use crate::transcribe::{AudioDecoder, ModelLoader, Progress, RawTranscription, transcribe_waveform};

/// Result of a successful job
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub transcript: RawTranscription,
    pub output_path: PathBuf,
    pub download_name: String,
    pub duration_secs: f64,
}

pub struct Pipeline {
    loader: Arc<ModelLoader>,
    decoder: Arc<dyn AudioDecoder>,
    output: OutputManager,
    chunk_secs: u64,
}

impl Pipeline {
    pub fn new(
        loader: Arc<ModelLoader>,
        decoder: Arc<dyn AudioDecoder>,
        output: OutputManager,
        chunk_secs: u64,
    ) -> Self {
        Self {
            loader,
            decoder,
            output,
            chunk_secs,
        }
    }

    /// Run a job synchronously. Blocking; call from a blocking context.
    pub fn execute(
        &self,
        job: &Job,
        on_progress: &mut dyn FnMut(Progress),
    ) -> Result<JobOutput, ScribeError> {
        let path = job
            .input_path
            .as_deref()
            .ok_or_else(|| ScribeError::InputNotFound(PathBuf::from(&job.original_filename)))?;

        let metadata = std::fs::metadata(path).map_err(|e| ScribeError::from_input_io(path, &e))?;
        if !metadata.is_file() {
            return Err(ScribeError::InputNotFound(path.to_path_buf()));
        }
        info!("Input {:?}: {:.2} MB", path, metadata.len() as f64 / (1024.0 * 1024.0));

        let loaded = self.loader.get()?;
        if loaded.degraded {
            info!("Job {} runs on fallback model {}", job.id, loaded.tier);
        }

        let waveform = self.decoder.decode(path)?;

        let transcript = transcribe_waveform(
            loaded.model.as_ref(),
            &waveform,
            &job.language,
            self.chunk_secs,
            on_progress,
        )?;
        info!(
            "Job {}: {} characters transcribed from {:.1}s of audio",
            job.id,
            transcript.text.len(),
            waveform.duration_secs
        );

        let rendered = self.output.write(job, &transcript)?;

        Ok(JobOutput {
            transcript,
            output_path: rendered.path,
            download_name: rendered.download_name,
            duration_secs: waveform.duration_secs,
        })
    }
}

/// Fakes for exercising the pipeline without real audio or models.
#[cfg(test)]
pub(crate) mod testing {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use crate::error::ScribeError;
    use crate::output::{DocumentMetadata, DocumentRenderer, OutputFormat};
    use crate::transcribe::{
        Language, ModelBackend, ModelTier, RawTranscription, Segment, SpeechModel,
        WHISPER_SAMPLE_RATE, Waveform,
    };

    /// Every input decodes to `secs` of silence. Names containing "corrupt"
    /// fail to decode and names containing "panic" crash the decoder.
    pub struct FakeDecoder {
        pub secs: usize,
    }

    impl crate::transcribe::AudioDecoder for FakeDecoder {
        fn decode(&self, path: &Path) -> Result<Waveform, ScribeError> {
            std::fs::File::open(path).map_err(|e| ScribeError::from_input_io(path, &e))?;
            if path.to_string_lossy().contains("panic") {
                panic!("decoder crashed on {:?}", path);
            }
            if path.to_string_lossy().contains("corrupt") {
                return Err(ScribeError::UnsupportedFormat(format!("cannot decode {:?}", path)));
            }
            Ok(Waveform::from_samples(vec![0.0; self.secs * WHISPER_SAMPLE_RATE as usize]))
        }
    }

    /// Says "words" for every call; silent when `silent` is set.
    pub struct WordsModel {
        pub silent: bool,
    }

    impl SpeechModel for WordsModel {
        fn transcribe(
            &self,
            samples: &[f32],
            _: &Language,
        ) -> Result<RawTranscription, ScribeError> {
            if self.silent {
                return Ok(RawTranscription::default());
            }
            let secs = samples.len() as f64 / WHISPER_SAMPLE_RATE as f64;
            Ok(RawTranscription {
                text: "words".into(),
                segments: vec![Segment { start: 0.0, end: secs, text: "words".into() }],
            })
        }
    }

    pub struct WordsBackend {
        pub silent: bool,
        pub loadable: bool,
    }

    impl ModelBackend for WordsBackend {
        fn load(&self, tier: ModelTier) -> Result<Arc<dyn SpeechModel>, String> {
            if self.loadable {
                Ok(Arc::new(WordsModel { silent: self.silent }))
            } else {
                Err(format!("{} is not installed", tier))
            }
        }
    }

    /// Writes the transcript as plain text and remembers what it rendered.
    #[derive(Default)]
    pub struct TextRenderer {
        pub rendered: Mutex<Vec<(String, String)>>,
    }

    impl DocumentRenderer for TextRenderer {
        fn render(
            &self,
            text: &str,
            metadata: &DocumentMetadata,
            _: OutputFormat,
            path: &Path,
        ) -> Result<PathBuf, ScribeError> {
            std::fs::write(path, text).map_err(|e| ScribeError::RenderFailed(e.to_string()))?;
            self.rendered
                .lock()
                .unwrap()
                .push((metadata.filename.clone(), text.to_string()));
            Ok(path.to_path_buf())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::output::OutputFormat;
    use crate::transcribe::{Language, ModelTier, NO_SPEECH_SENTINEL};

    struct Fixture {
        dir: tempfile::TempDir,
        renderer: Arc<TextRenderer>,
        pipeline: Pipeline,
    }

    fn fixture(secs: usize, silent: bool, loadable: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(TextRenderer::default());
        let loader = ModelLoader::new(WordsBackend { silent, loadable }, ModelTier::Base, true);
        let pipeline = Pipeline::new(
            Arc::new(loader),
            Arc::new(FakeDecoder { secs }),
            OutputManager::new(dir.path().join("outputs"), renderer.clone()),
            6,
        );
        Fixture { dir, renderer, pipeline }
    }

    fn staged_job(dir: &std::path::Path, name: &str) -> Job {
        let path = dir.join(name);
        std::fs::write(&path, b"audio").unwrap();
        Job::new(path, name, OutputFormat::Pdf, Language::Auto)
    }

    #[test]
    fn test_chunked_job_reports_progress_and_renders() {
        let f = fixture(15, false, true);
        let job = staged_job(f.dir.path(), "talk.wav");
        let mut percents = Vec::new();

        let output = f.pipeline.execute(&job, &mut |p| percents.push(p.percent)).unwrap();

        assert_eq!(percents, vec![33, 66]);
        assert_eq!(output.transcript.text, "words\nwords\nwords");
        assert_eq!(output.transcript.segments.last().unwrap().end, 15.0);
        assert_eq!(std::fs::read_to_string(&output.output_path).unwrap(), output.transcript.text);
        assert_eq!(f.renderer.rendered.lock().unwrap()[0].0, "talk.wav");
    }

    #[test]
    fn test_missing_input() {
        let f = fixture(1, false, true);
        let job = Job::new(f.dir.path().join("gone.wav"), "gone.wav", OutputFormat::Pdf, Language::Auto);
        assert!(matches!(
            f.pipeline.execute(&job, &mut |_| {}),
            Err(ScribeError::InputNotFound(_))
        ));
        assert!(f.renderer.rendered.lock().unwrap().is_empty());
    }

    #[test]
    fn test_silence_renders_sentinel() {
        let f = fixture(2, true, true);
        let job = staged_job(f.dir.path(), "quiet.wav");
        let output = f.pipeline.execute(&job, &mut |_| {}).unwrap();
        assert_eq!(output.transcript.text, NO_SPEECH_SENTINEL);
        assert_eq!(f.renderer.rendered.lock().unwrap()[0].1, NO_SPEECH_SENTINEL);
    }

    #[test]
    fn test_model_failure_skips_decode_and_render() {
        let f = fixture(2, false, false);
        let job = staged_job(f.dir.path(), "talk.wav");
        match f.pipeline.execute(&job, &mut |_| {}) {
            Err(ScribeError::ModelUnavailable(failures)) => {
                assert_eq!(failures.tiers().len(), 3);
            }
            other => panic!("expected ModelUnavailable, got {:?}", other),
        }
        assert!(f.renderer.rendered.lock().unwrap().is_empty());
    }
}
