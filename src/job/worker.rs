use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{JobId, JobRegistry, JobStatus};
use crate::error::ScribeError;
use crate::pipeline::{JobOutput, Pipeline};

/// Where a synchronous submitter waits for its job's outcome
pub type Reply = oneshot::Sender<Result<JobOutput, ScribeError>>;

#[derive(Debug)]
struct QueuedJob {
    id: JobId,
    reply: Option<Reply>,
}

/// Producer side of the FIFO job queue; cheap to clone.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<QueuedJob>,
}

impl QueueHandle {
    pub fn enqueue(&self, id: JobId, reply: Option<Reply>) -> Result<(), ScribeError> {
        self.tx
            .send(QueuedJob { id, reply })
            .map_err(|_| ScribeError::ShuttingDown)
    }
}

/// Running worker task; stop it with [`WorkerHandle::shutdown`].
#[derive(Debug)]
pub struct WorkerHandle {
    stop: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop after the current job (if any) and wait for the loop to exit.
    /// Jobs still queued stay PENDING.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.join.await {
            error!("Transcription worker ended abnormally: {}", e);
        }
    }
}

/// The single consumer: runs queued jobs one at a time, in order.
pub struct Worker {
    rx: mpsc::UnboundedReceiver<QueuedJob>,
    stop: oneshot::Receiver<()>,
    registry: JobRegistry,
    pipeline: Arc<Pipeline>,
}

impl Worker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(registry: JobRegistry, pipeline: Arc<Pipeline>) -> (QueueHandle, WorkerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        let worker = Self {
            rx,
            stop: stop_rx,
            registry,
            pipeline,
        };
        let join = tokio::spawn(worker.run());

        (QueueHandle { tx }, WorkerHandle { stop: stop_tx, join })
    }

    async fn run(mut self) {
        info!("Transcription worker started");

        loop {
            tokio::select! {
                biased;
                _ = &mut self.stop => {
                    info!("Transcription worker shutting down");
                    break;
                }
                msg = self.rx.recv() => match msg {
                    Some(QueuedJob { id, reply }) => self.process(id, reply).await,
                    None => {
                        info!("Job queue closed");
                        break;
                    }
                },
            }
        }

        info!("Transcription worker ended");
    }

    async fn process(&self, id: JobId, reply: Option<Reply>) {
        let job = match self.registry.mark_processing(id) {
            Ok(job) if job.status == JobStatus::Processing => job,
            Ok(job) => {
                warn!("Skipping job {}: already {}", id, job.status);
                if let Some(reply) = reply {
                    let _ = reply.send(Err(ScribeError::TranscriptionFailed(format!(
                        "job {} is already {}",
                        id, job.status
                    ))));
                }
                return;
            }
            Err(e) => {
                error!("Dropping queued job {}: {}", id, e);
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
                return;
            }
        };

        info!("Processing job {} ({})", id, job.original_filename);

        let pipeline = Arc::clone(&self.pipeline);
        let registry = self.registry.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            pipeline.execute(&job, &mut |progress| {
                if let Err(e) = registry.report_progress(id, progress) {
                    warn!("Failed to record progress for job {}: {}", id, e);
                }
            })
        })
        .await
        .unwrap_or_else(|e| {
            Err(ScribeError::TranscriptionFailed(format!("job task aborted: {}", e)))
        });

        let recorded = match &outcome {
            Ok(output) => {
                info!("Job {} completed: {:?}", id, output.output_path);
                self.registry.complete(
                    id,
                    output.output_path.clone(),
                    output.download_name.clone(),
                )
            }
            Err(e) => {
                error!("Job {} failed: {}", id, e);
                self.registry.fail(id, e.to_string())
            }
        };
        if let Err(e) = recorded {
            error!("Failed to record outcome of job {}: {}", id, e);
        }

        remove_input(&self.registry, id);

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }
}

/// Delete a finished job's input artifact; failures are only logged.
pub(crate) fn remove_input(registry: &JobRegistry, id: JobId) {
    match registry.take_input(id) {
        Ok(Some(path)) => match std::fs::remove_file(&path) {
            Ok(()) => info!("Removed input {:?} of job {}", path, id),
            Err(e) => warn!("Failed to remove input {:?} of job {}: {}", path, id, e),
        },
        Ok(None) => {}
        Err(e) => warn!("Cannot clean up job {}: {}", id, e),
    }
}
