use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::jobs::{Job, JobId};
use crate::media::MediaFormat;

/// Response for an accepted submission
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: String,
}

/// Response for a status query
///
/// `status` is `processing`, `done` or `failed: <reason>`.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: String,
    pub output_format: MediaFormat,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        JobStatusResponse {
            job_id: job.id,
            status: job.status.to_string(),
            output_format: job.output_format,
            created_at: job.created_at,
            finished_at: job.finished_at,
        }
    }
}

/// Response for a completed cleanup
#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub job_id: JobId,
    pub message: String,
}

/// Converted file opened for streaming
#[derive(Debug)]
pub struct DownloadFile {
    pub file_name: String,
    pub content_type: &'static str,
    pub len: u64,
    pub file: tokio::fs::File,
}
