use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::models::{Job, JobId, JobStatus};
use crate::media::MediaFormat;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job {0} already exists")]
    Duplicate(JobId),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {0} is still processing")]
    StillProcessing(JobId),
}

/// Result of a terminal status update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    AlreadyTerminal,
    Missing,
    Rejected,
}

/// Process-lifetime registry of conversion jobs
///
/// All operations take the same lock for a short, non-blocking critical
/// section. Nothing here runs while an external process is executing.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        // The map holds plain data, so a panic elsewhere cannot leave it half-updated
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new job in the `processing` state
    pub fn create(
        &self,
        id: JobId,
        input_path: PathBuf,
        output_path: PathBuf,
        output_format: MediaFormat,
    ) -> Result<Job, RegistryError> {
        let mut jobs = self.lock();
        if jobs.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }

        let job = Job {
            id,
            status: JobStatus::Processing,
            input_path,
            output_path,
            output_format,
            created_at: Utc::now(),
            finished_at: None,
        };
        jobs.insert(id, job.clone());
        debug!(job_id = %id, "Job registered");
        Ok(job)
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.lock().get(id).cloned()
    }

    /// Move a job from `processing` to a terminal status
    ///
    /// Terminal states are final: a second call leaves the first outcome in place.
    pub fn set_terminal(&self, id: &JobId, status: JobStatus) -> Transition {
        if !status.is_terminal() {
            warn!(job_id = %id, "Refusing to move job back to processing");
            return Transition::Rejected;
        }

        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(id) else {
            return Transition::Missing;
        };
        if job.status.is_terminal() {
            return Transition::AlreadyTerminal;
        }

        job.status = status;
        job.finished_at = Some(Utc::now());
        Transition::Applied
    }

    /// Detach a finished job and hand back its input and output paths
    pub fn remove_and_collect_paths(&self, id: &JobId) -> Result<(PathBuf, PathBuf), RegistryError> {
        let mut jobs = self.lock();
        match jobs.get(id) {
            None => return Err(RegistryError::NotFound(*id)),
            Some(job) if !job.status.is_terminal() => {
                return Err(RegistryError::StillProcessing(*id))
            }
            Some(_) => {}
        }

        jobs.remove(id)
            .map(|job| (job.input_path, job.output_path))
            .ok_or(RegistryError::NotFound(*id))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn count_processing(&self) -> usize {
        self.lock()
            .values()
            .filter(|job| !job.status.is_terminal())
            .count()
    }
}
