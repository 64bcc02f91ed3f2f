//! Facade over registry, queue and worker: what a front end talks to.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, oneshot};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ScribeError;
use crate::job::{Job, JobId, JobRegistry, JobStatus, JobView, QueueHandle, Worker, WorkerHandle, remove_input};
use crate::output::{DocumentRenderer, DocumentWriter, OutputFormat, OutputManager};
use crate::pipeline::Pipeline;
use crate::transcribe::{
    AudioDecoder, Language, ModelBackend, ModelLoader, ModelTier, RawTranscription, WavDecoder,
    WhisperBackend,
};

/// Input extensions accepted for submission
pub const ALLOWED_EXTENSIONS: [&str; 12] = [
    "mp3", "wav", "flac", "m4a", "aac", "ogg", "wma", "mp4", "avi", "mov", "mkv", "webm",
];

/// A staged input artifact waiting to become a job
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Staged copy; deleted once the job finishes
    pub input_path: PathBuf,
    pub original_filename: String,
    pub format: OutputFormat,
    /// Falls back to the configured default language
    pub language: Option<Language>,
}

/// Where to fetch a finished job's document from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Download {
    pub path: PathBuf,
    pub name: String,
    pub content_type: &'static str,
}

/// Outcome of a synchronous submission
#[derive(Debug, Clone)]
pub struct JobResult {
    pub id: JobId,
    pub transcript: RawTranscription,
    pub duration_secs: f64,
    pub download: Download,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub model_loaded: bool,
    pub requested_model: ModelTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_model: Option<ModelTier>,
    pub degraded: bool,
    pub auto_downgrade: bool,
    /// Tiers tried in order on first load
    pub fallback_chain: Vec<ModelTier>,
    pub chunk_secs: u64,
    pub input_formats: &'static [&'static str],
    pub output_formats: [OutputFormat; 2],
    /// 0 when unlimited
    pub max_file_bytes: u64,
    pub jobs: usize,
}

pub struct TranscriptionService {
    config: Config,
    registry: JobRegistry,
    queue: QueueHandle,
    loader: Arc<ModelLoader>,
    worker: Mutex<Option<WorkerHandle>>,
    closed: AtomicBool,
}

impl TranscriptionService {
    /// Wire up the service and spawn its worker. Must run inside a tokio runtime.
    pub fn new(
        config: Config,
        backend: impl ModelBackend + 'static,
        decoder: Arc<dyn AudioDecoder>,
        renderer: Arc<dyn DocumentRenderer>,
    ) -> Self {
        let loader = Arc::new(ModelLoader::new(backend, config.model, config.auto_downgrade));
        let pipeline = Pipeline::new(
            Arc::clone(&loader),
            decoder,
            OutputManager::new(config.output_dir.clone(), renderer),
            config.chunk_secs,
        );

        let registry = JobRegistry::new();
        let (queue, worker) = Worker::spawn(registry.clone(), Arc::new(pipeline));

        info!(
            "Transcription service ready (model {}, auto-downgrade {}, chunk {}s)",
            config.model, config.auto_downgrade, config.chunk_secs
        );

        Self {
            config,
            registry,
            queue,
            loader,
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
        }
    }

    /// Service backed by whisper.cpp, hound/ffmpeg decoding and the built-in renderers.
    pub fn from_config(config: Config) -> Self {
        let backend = WhisperBackend::new(
            config.models_dir.clone(),
            config.download_models,
            config.n_threads,
        );
        let decoder = WavDecoder::new(config.ffmpeg.clone());
        if !decoder.ffmpeg_available() {
            warn!(
                "ffmpeg not found at {:?}; only WAV inputs can be decoded",
                config.ffmpeg
            );
        }
        Self::new(config, backend, Arc::new(decoder), Arc::new(DocumentWriter))
    }

    /// Queue a job and return its id immediately.
    pub fn submit_async(&self, request: SubmitRequest) -> Result<JobId, ScribeError> {
        self.enqueue(request, None)
    }

    /// Queue a job and wait for its outcome.
    pub async fn submit_sync(&self, request: SubmitRequest) -> Result<JobResult, ScribeError> {
        let (tx, rx) = oneshot::channel();
        let id = self.enqueue(request, Some(tx))?;

        match rx.await {
            Ok(Ok(output)) => {
                let download = self.download(id)?;
                Ok(JobResult {
                    id,
                    transcript: output.transcript,
                    duration_secs: output.duration_secs,
                    download,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                // Worker stopped before reaching this job
                self.abandon(id);
                Err(ScribeError::ShuttingDown)
            }
        }
    }

    fn enqueue(
        &self,
        request: SubmitRequest,
        reply: Option<crate::job::Reply>,
    ) -> Result<JobId, ScribeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScribeError::ShuttingDown);
        }
        validate_extension(&request.original_filename)?;
        self.validate_size(&request.input_path)?;

        let language = request
            .language
            .unwrap_or_else(|| self.config.default_language.clone());
        let job = Job::new(
            request.input_path,
            request.original_filename,
            request.format,
            language,
        );
        let id = self.registry.insert(job);

        if let Err(e) = self.queue.enqueue(id, reply) {
            self.abandon(id);
            return Err(e);
        }

        info!("Job {} queued", id);
        Ok(id)
    }

    fn validate_size(&self, path: &Path) -> Result<(), ScribeError> {
        let limit = self.config.max_file_bytes;
        if limit == 0 {
            return Ok(());
        }
        // A missing input is reported by the worker as InputNotFound
        match std::fs::metadata(path) {
            Ok(metadata) if metadata.len() > limit => Err(ScribeError::FileTooLarge {
                size: metadata.len(),
                limit,
            }),
            _ => Ok(()),
        }
    }

    fn abandon(&self, id: JobId) {
        if let Err(e) = self.registry.abandon(id, ScribeError::ShuttingDown.to_string()) {
            warn!("Failed to abandon job {}: {}", id, e);
        }
        remove_input(&self.registry, id);
    }

    pub fn status(&self, id: JobId) -> Result<JobView, ScribeError> {
        self.registry.view(id)
    }

    /// Status of every known job, oldest first.
    pub fn jobs(&self) -> Vec<JobView> {
        self.registry.views()
    }

    pub fn download(&self, id: JobId) -> Result<Download, ScribeError> {
        let job = self.registry.get(id)?;
        let not_ready = || ScribeError::JobNotReady { id, status: job.status };
        if job.status != JobStatus::Done {
            return Err(not_ready());
        }

        let path = job.output_path.clone().ok_or_else(not_ready)?;
        let name = job.download_name.clone().ok_or_else(not_ready)?;
        Ok(Download {
            path,
            name,
            content_type: job.format.content_type(),
        })
    }

    pub fn info(&self) -> ServiceInfo {
        let loaded = self.loader.loaded();
        ServiceInfo {
            model_loaded: loaded.is_some(),
            requested_model: self.config.model,
            loaded_model: loaded.map(|m| m.tier),
            degraded: loaded.is_some_and(|m| m.degraded),
            auto_downgrade: self.config.auto_downgrade,
            fallback_chain: self.loader.chain().tiers().to_vec(),
            chunk_secs: self.config.chunk_secs,
            input_formats: &ALLOWED_EXTENSIONS,
            output_formats: OutputFormat::ALL,
            max_file_bytes: self.config.max_file_bytes,
            jobs: self.registry.len(),
        }
    }

    /// Load the model ahead of the first job.
    pub async fn preload(&self) -> Result<ModelTier, ScribeError> {
        let loader = Arc::clone(&self.loader);
        tokio::task::spawn_blocking(move || loader.get().map(|m| m.tier))
            .await
            .map_err(|e| ScribeError::TranscriptionFailed(format!("model preload aborted: {}", e)))?
    }

    /// Stop accepting work, let the current job finish and join the worker.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.lock().await.take() {
            worker.shutdown().await;
        }
    }
}

fn validate_extension(filename: &str) -> Result<(), ScribeError> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);

    match ext {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(ScribeError::UnsupportedFormat(format!(
            "{:?} is not one of: {}",
            filename,
            ALLOWED_EXTENSIONS.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{FakeDecoder, TextRenderer, WordsBackend};
    use crate::transcribe::{CountingBackend, NO_SPEECH_SENTINEL, SpeechModel};
    use std::sync::mpsc;
    use std::time::Duration;

    struct Harness {
        dir: tempfile::TempDir,
        renderer: Arc<TextRenderer>,
        service: Arc<TranscriptionService>,
    }

    fn harness(backend: impl ModelBackend + 'static, secs: usize) -> Harness {
        harness_with(backend, secs, |_| {})
    }

    fn harness_with(
        backend: impl ModelBackend + 'static,
        secs: usize,
        tweak: impl FnOnce(&mut Config),
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            upload_dir: dir.path().join("uploads"),
            output_dir: dir.path().join("outputs"),
            model: ModelTier::Medium,
            chunk_secs: 6,
            ..Config::default()
        };
        tweak(&mut config);
        config.ensure_dirs().unwrap();

        let renderer = Arc::new(TextRenderer::default());
        let service = TranscriptionService::new(
            config,
            backend,
            Arc::new(FakeDecoder { secs }),
            renderer.clone(),
        );
        Harness {
            dir,
            renderer,
            service: Arc::new(service),
        }
    }

    fn words() -> WordsBackend {
        WordsBackend { silent: false, loadable: true }
    }

    impl Harness {
        fn stage(&self, name: &str) -> SubmitRequest {
            let input_path = self.dir.path().join("uploads").join(name);
            std::fs::write(&input_path, b"audio").unwrap();
            SubmitRequest {
                input_path,
                original_filename: name.to_string(),
                format: OutputFormat::Pdf,
                language: None,
            }
        }

        async fn wait_terminal(&self, id: JobId) -> JobView {
            for _ in 0..500 {
                let view = self.service.status(id).unwrap();
                if view.status.is_terminal() {
                    return view;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("job {} never finished", id);
        }
    }

    #[tokio::test]
    async fn test_async_jobs_run_in_submission_order() {
        let h = harness(words(), 2);
        let names = ["a.wav", "b.mp3", "c.flac"];
        let ids: Vec<JobId> = names
            .iter()
            .map(|n| h.service.submit_async(h.stage(n)).unwrap())
            .collect();

        for id in &ids {
            assert_eq!(h.wait_terminal(*id).await.status, JobStatus::Done);
        }

        let rendered: Vec<String> =
            h.renderer.rendered.lock().unwrap().iter().map(|r| r.0.clone()).collect();
        assert_eq!(rendered, names);
        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_the_worker() {
        let h = harness(words(), 2);
        let bad = h.service.submit_async(h.stage("corrupt.wav")).unwrap();
        let good = h.service.submit_async(h.stage("fine.wav")).unwrap();

        let bad_view = h.wait_terminal(bad).await;
        assert_eq!(bad_view.status, JobStatus::Error);
        assert!(bad_view.error.unwrap().contains("Unsupported format"));
        assert_eq!(h.wait_terminal(good).await.status, JobStatus::Done);

        // Both inputs cleaned up, output only for the good one
        assert!(!h.dir.path().join("uploads/corrupt.wav").exists());
        assert!(!h.dir.path().join("uploads/fine.wav").exists());
        assert!(matches!(h.service.download(bad), Err(ScribeError::JobNotReady { .. })));
        assert!(h.service.download(good).is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_extension_creates_no_job() {
        let h = harness(words(), 2);
        let err = h.service.submit_async(h.stage("notes.txt")).unwrap_err();
        assert!(matches!(err, ScribeError::UnsupportedFormat(_)));
        let err = h.service.submit_async(h.stage("noext")).unwrap_err();
        assert!(matches!(err, ScribeError::UnsupportedFormat(_)));
        assert_eq!(h.service.info().jobs, 0);
    }

    #[tokio::test]
    async fn test_sync_submission_lists_every_failed_tier() {
        let h = harness(WordsBackend { silent: false, loadable: false }, 2);
        let request = h.stage("talk.wav");
        let input = request.input_path.clone();

        match h.service.submit_sync(request).await {
            Err(ScribeError::ModelUnavailable(failures)) => assert_eq!(
                failures.tiers(),
                vec![ModelTier::Medium, ModelTier::Base, ModelTier::Small, ModelTier::Tiny]
            ),
            other => panic!("expected ModelUnavailable, got {:?}", other),
        }
        assert!(!input.exists());
        assert!(!h.service.info().model_loaded);
    }

    #[tokio::test]
    async fn test_sync_submission_returns_transcript_and_download() {
        let h = harness(words(), 15);
        let result = h.service.submit_sync(h.stage("long.wav")).await.unwrap();

        assert_eq!(result.transcript.text, "words\nwords\nwords");
        assert_eq!(result.download.content_type, "application/pdf");
        assert!(result.download.name.ends_with("_transcription.pdf"));
        assert!(result.download.path.exists());

        let view = h.service.status(result.id).unwrap();
        assert_eq!(view.status, JobStatus::Done);
        assert_eq!(view.progress, 100);
        assert_eq!(view.progress_meta["total_chunks"], 3);

        let info = h.service.info();
        assert!(info.model_loaded);
        assert_eq!(info.loaded_model, Some(ModelTier::Medium));
        assert!(!info.degraded);
    }

    #[tokio::test]
    async fn test_silence_finishes_with_sentinel() {
        let h = harness(WordsBackend { silent: true, loadable: true }, 3);
        let result = h.service.submit_sync(h.stage("quiet.ogg")).await.unwrap();
        assert_eq!(result.transcript.text, NO_SPEECH_SENTINEL);
        assert_eq!(
            std::fs::read_to_string(&result.download.path).unwrap(),
            NO_SPEECH_SENTINEL
        );
    }

    #[tokio::test]
    async fn test_input_is_cleaned_up_exactly_once() {
        let h = harness(words(), 2);
        let id = h.service.submit_async(h.stage("once.wav")).unwrap();
        h.wait_terminal(id).await;

        assert!(!h.dir.path().join("uploads/once.wav").exists());
        assert_eq!(h.service.registry.take_input(id).unwrap(), None);
        // A second cleanup pass is a no-op
        remove_input(&h.service.registry, id);
    }

    #[tokio::test]
    async fn test_download_before_done_and_unknown_job() {
        let h = harness(words(), 2);
        let pending = h.service.registry.insert(Job::new(
            h.dir.path().join("uploads/x.wav"),
            "x.wav",
            OutputFormat::Docx,
            Language::Auto,
        ));
        assert!(matches!(
            h.service.download(pending),
            Err(ScribeError::JobNotReady { status: JobStatus::Pending, .. })
        ));
        assert!(matches!(h.service.download(JobId::new()), Err(ScribeError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_preload_reports_degraded_tier() {
        let backend = CountingBackend {
            loadable: vec![ModelTier::Small],
            ..Default::default()
        };
        let h = harness(backend, 2);
        assert_eq!(h.service.preload().await.unwrap(), ModelTier::Small);
        let info = h.service.info();
        assert_eq!(info.requested_model, ModelTier::Medium);
        assert_eq!(
            info.fallback_chain,
            vec![ModelTier::Medium, ModelTier::Base, ModelTier::Small, ModelTier::Tiny]
        );
        assert_eq!(info.loaded_model, Some(ModelTier::Small));
        assert!(info.degraded);
    }

    /// Model that blocks each call until the test releases it.
    struct GateBackend {
        gate: std::sync::Mutex<Option<mpsc::Receiver<()>>>,
    }

    struct GateModel {
        gate: std::sync::Mutex<mpsc::Receiver<()>>,
    }

    impl SpeechModel for GateModel {
        fn transcribe(&self, _: &[f32], _: &Language) -> Result<RawTranscription, ScribeError> {
            let _ = self.gate.lock().unwrap().recv();
            Ok(RawTranscription { text: "gated".into(), segments: vec![] })
        }
    }

    impl ModelBackend for GateBackend {
        fn load(&self, _: ModelTier) -> Result<Arc<dyn SpeechModel>, String> {
            let gate = self.gate.lock().unwrap().take().ok_or("already loaded")?;
            Ok(Arc::new(GateModel { gate: std::sync::Mutex::new(gate) }))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_finishes_current_job_and_leaves_queue_pending() {
        let (release, gate) = mpsc::channel();
        let h = harness(GateBackend { gate: std::sync::Mutex::new(Some(gate)) }, 2);

        let first = h.service.submit_async(h.stage("first.wav")).unwrap();
        let second = h.service.submit_async(h.stage("second.wav")).unwrap();

        while h.service.status(first).unwrap().status != JobStatus::Processing {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let service = Arc::clone(&h.service);
        let stopping = tokio::spawn(async move { service.shutdown().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.send(()).unwrap();
        stopping.await.unwrap();

        assert_eq!(h.service.status(first).unwrap().status, JobStatus::Done);
        assert_eq!(h.service.status(second).unwrap().status, JobStatus::Pending);
        assert!(matches!(
            h.service.submit_async(h.stage("late.wav")),
            Err(ScribeError::ShuttingDown)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sync_waiter_queued_at_shutdown_is_abandoned() {
        let (release, gate) = mpsc::channel();
        let h = harness(GateBackend { gate: std::sync::Mutex::new(Some(gate)) }, 2);

        let first = h.service.submit_async(h.stage("first.wav")).unwrap();
        while h.service.status(first).unwrap().status != JobStatus::Processing {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let request = h.stage("waiting.wav");
        let input = request.input_path.clone();
        let service = Arc::clone(&h.service);
        let waiter = tokio::spawn(async move { service.submit_sync(request).await });
        while h.service.jobs().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let service = Arc::clone(&h.service);
        let stopping = tokio::spawn(async move { service.shutdown().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.send(()).unwrap();
        stopping.await.unwrap();

        assert!(matches!(waiter.await.unwrap(), Err(ScribeError::ShuttingDown)));

        let views = h.service.jobs();
        let waiting = views.iter().find(|v| v.original_filename == "waiting.wav").unwrap();
        assert_eq!(waiting.status, JobStatus::Error);
        assert!(waiting.error.as_deref().unwrap().contains("shutting down"));
        assert!(!input.exists());
        assert_eq!(h.service.status(first).unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_crashing_job_is_recorded_and_worker_continues() {
        let h = harness(words(), 2);
        let crashed = h.service.submit_async(h.stage("panic.wav")).unwrap();
        let next = h.service.submit_async(h.stage("after.wav")).unwrap();

        let view = h.wait_terminal(crashed).await;
        assert_eq!(view.status, JobStatus::Error);
        assert!(view.error.unwrap().contains("job task aborted"));
        assert!(!h.dir.path().join("uploads/panic.wav").exists());

        assert_eq!(h.wait_terminal(next).await.status, JobStatus::Done);
        assert_eq!(h.service.jobs().len(), 2);
    }

    #[tokio::test]
    async fn test_oversized_input_is_rejected_before_queueing() {
        let h = harness_with(words(), 2, |config| config.max_file_bytes = 4);

        // Staged inputs are five bytes long
        match h.service.submit_async(h.stage("big.wav")) {
            Err(ScribeError::FileTooLarge { size, limit }) => {
                assert_eq!((size, limit), (5, 4));
            }
            other => panic!("expected FileTooLarge, got {:?}", other),
        }
        let info = h.service.info();
        assert_eq!(info.jobs, 0);
        assert_eq!(info.max_file_bytes, 4);
    }

    #[test]
    fn test_extension_check_is_case_insensitive() {
        assert!(validate_extension("Meeting.MP3").is_ok());
        assert!(validate_extension("clip.webm").is_ok());
        assert!(validate_extension("archive.zip").is_err());
    }
}
