use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use super::{Job, JobId, JobStatus, JobView};
use crate::error::ScribeError;
use crate::transcribe::Progress;

/// Shared job table. Every operation takes the lock once, so readers only
/// ever see whole updates.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Job>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, job: Job) -> JobId {
        let id = job.id;
        self.write().insert(id, job);
        id
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Snapshot of the full record
    pub fn get(&self, id: JobId) -> Result<Job, ScribeError> {
        self.read().get(&id).cloned().ok_or(ScribeError::JobNotFound(id))
    }

    pub fn view(&self, id: JobId) -> Result<JobView, ScribeError> {
        self.read()
            .get(&id)
            .map(Job::view)
            .ok_or(ScribeError::JobNotFound(id))
    }

    /// Snapshots of every job, oldest first
    pub fn views(&self) -> Vec<JobView> {
        let mut views: Vec<JobView> = self.read().values().map(Job::view).collect();
        views.sort_by_key(|v| v.submitted_at);
        views
    }

    /// Apply `f` under the write lock and return the updated snapshot.
    fn update<F>(&self, id: JobId, f: F) -> Result<Job, ScribeError>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.write();
        let job = jobs.get_mut(&id).ok_or(ScribeError::JobNotFound(id))?;
        f(job);
        Ok(job.clone())
    }

    /// Move to `next` if the state machine allows it; illegal moves are logged and skipped.
    fn transition<F>(&self, id: JobId, next: JobStatus, f: F) -> Result<Job, ScribeError>
    where
        F: FnOnce(&mut Job),
    {
        self.update(id, |job| {
            if job.status.can_become(next) {
                job.status = next;
                f(job);
            } else {
                warn!("Ignoring transition of job {} from {} to {}", id, job.status, next);
            }
        })
    }

    pub fn mark_processing(&self, id: JobId) -> Result<Job, ScribeError> {
        self.transition(id, JobStatus::Processing, |_| {})
    }

    /// Record chunk progress; never moves backwards and never reaches 100 here.
    pub fn report_progress(&self, id: JobId, progress: Progress) -> Result<Job, ScribeError> {
        self.update(id, |job| {
            if job.status != JobStatus::Processing {
                return;
            }
            job.progress = job.progress.max(progress.percent.min(99));
            job.progress_meta
                .insert("current_chunk".into(), progress.current_chunk.into());
            job.progress_meta
                .insert("total_chunks".into(), progress.total_chunks.into());
        })
    }

    pub fn complete(
        &self,
        id: JobId,
        output_path: PathBuf,
        download_name: String,
    ) -> Result<Job, ScribeError> {
        self.transition(id, JobStatus::Done, |job| {
            job.progress = 100;
            if job.output_path.is_none() {
                job.output_path = Some(output_path);
                job.download_name = Some(download_name);
            }
        })
    }

    pub fn fail(&self, id: JobId, message: impl Into<String>) -> Result<Job, ScribeError> {
        let message = message.into();
        self.transition(id, JobStatus::Error, |job| job.error = Some(message))
    }

    /// Fail a job that never started (e.g. the queue closed under it).
    pub fn abandon(&self, id: JobId, message: impl Into<String>) -> Result<Job, ScribeError> {
        let message = message.into();
        self.update(id, |job| {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Error;
                job.error = Some(message);
            }
        })
    }

    /// Hand out the input path of a finished job, at most once.
    pub fn take_input(&self, id: JobId) -> Result<Option<PathBuf>, ScribeError> {
        let mut jobs = self.write();
        let job = jobs.get_mut(&id).ok_or(ScribeError::JobNotFound(id))?;
        if !job.status.is_terminal() {
            return Ok(None);
        }
        Ok(job.input_path.take())
    }
}
