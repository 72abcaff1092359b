use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use validator::Validate;

use super::dto::{CleanupResponse, DownloadFile, JobStatusResponse, SubmitResponse};
use super::models::ConversionRequest;
use crate::api::validation::ErrorResponse;
use crate::jobs::{JobId, JobRegistry, JobStatus, RegistryError};
use crate::media::MediaFormat;
use crate::pipeline::{PipelineError, TrustPipeline, Upload};
use crate::worker::{ConversionQueue, ConversionTask};

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Upload or request rejected by validation
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Malware detected")]
    MalwareDetected,

    /// Antivirus could not give a verdict
    #[error("Scan unavailable: {0}")]
    ScanUnavailable(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job not finished yet: {0}")]
    NotReady(JobId),

    /// Job says `done` but its output is gone
    #[error("Output file missing for job {0}")]
    OutputMissing(JobId),

    #[error("Storage error: {0}")]
    Storage(#[from] io::Error),

    #[error("Conversion queue unavailable")]
    QueueClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PipelineError> for ServiceError {
    fn from(err: PipelineError) -> Self {
        match err {
            e if e.is_validation() => ServiceError::Validation(e.to_string()),
            PipelineError::MalwareDetected { .. } => ServiceError::MalwareDetected,
            PipelineError::ScanUnavailable { reason } => ServiceError::ScanUnavailable(reason),
            PipelineError::Storage(e) => ServiceError::Storage(e),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) | ServiceError::MalwareDetected => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::NotReady(_) => StatusCode::CONFLICT,
            ServiceError::ScanUnavailable(_) | ServiceError::QueueClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::OutputMissing(_) | ServiceError::Storage(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (summary, message) = match self {
            ServiceError::Validation(msg) => {
                warn!("Validation error: {}", msg);
                ("Validation failed", msg.clone())
            }
            ServiceError::MalwareDetected => {
                warn!("Upload rejected: malware detected");
                ("Upload rejected", "File rejected: contains malware".to_string())
            }
            ServiceError::ScanUnavailable(reason) => {
                error!("Antivirus scan unavailable: {}", reason);
                ("Scan unavailable", "Antivirus scan could not be completed".to_string())
            }
            ServiceError::NotFound(id) => {
                warn!("Job not found: {}", id);
                ("Not found", format!("Job with id {} not found", id))
            }
            ServiceError::NotReady(id) => {
                warn!("Job not ready: {}", id);
                ("Not ready", "Job not finished yet".to_string())
            }
            ServiceError::OutputMissing(id) => {
                error!("Job {} is done but its output file is missing", id);
                ("Output missing", "Output file missing".to_string())
            }
            ServiceError::Storage(e) => {
                error!("Storage error: {}", e);
                ("Failed to process request", "Storage error occurred".to_string())
            }
            ServiceError::QueueClosed => {
                error!("Conversion queue is closed");
                ("Service unavailable", "Service is shutting down".to_string())
            }
            ServiceError::Internal(msg) => {
                error!("Internal error: {}", msg);
                ("Failed to process request", "Internal error occurred".to_string())
            }
        };

        HttpResponse::build(self.status_code()).json(ErrorResponse::new(summary, message))
    }
}

/// Job service: submission, status, download and cleanup
pub struct JobService {
    registry: Arc<JobRegistry>,
    pipeline: TrustPipeline,
    queue: ConversionQueue,
    output_dir: PathBuf,
}

impl JobService {
    /// Create a new JobService instance
    pub fn new(
        registry: Arc<JobRegistry>,
        pipeline: TrustPipeline,
        queue: ConversionQueue,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            pipeline,
            queue,
            output_dir: output_dir.into(),
        }
    }

    /// Submit an upload for conversion
    ///
    /// # Business Logic
    /// - Validates the requested output format
    /// - Runs the upload through the trust pipeline (type checks, persist, scan)
    /// - Registers the job as `processing`
    /// - Hands the conversion to the worker pool and returns immediately
    ///
    /// # Returns
    /// - `Ok(SubmitResponse)` - Job accepted
    /// - `Err(ServiceError)` - Rejected; no job exists and no file is kept
    pub async fn submit<R>(
        &self,
        upload: Upload<R>,
        request: ConversionRequest,
    ) -> Result<SubmitResponse, ServiceError>
    where
        R: Read + Seek + Send + 'static,
    {
        let job_id = JobId::new();
        info!(
            "Service: Submitting job {} ({} -> {})",
            job_id, upload.file_name, request.output_format
        );

        let output_format = Self::validate_request(&request)?;
        let input_path = self.pipeline.validate_and_persist(upload, job_id).await?;
        let output_path = self
            .output_dir
            .join(format!("{}.{}", job_id, request.output_format));

        let job = match self.registry.create(
            job_id,
            input_path.clone(),
            output_path.clone(),
            output_format,
        ) {
            Ok(job) => job,
            Err(e) => {
                remove_if_present(&input_path).await;
                return Err(ServiceError::Internal(e.to_string()));
            }
        };

        let task = ConversionTask {
            job_id,
            input_path,
            output_path,
        };
        if self.queue.dispatch(task).is_err() {
            self.registry
                .set_terminal(&job_id, JobStatus::failed("conversion queue unavailable"));
            if let Ok((input, _)) = self.registry.remove_and_collect_paths(&job_id) {
                remove_if_present(&input).await;
            }
            return Err(ServiceError::QueueClosed);
        }

        info!(
            job_id = %job_id,
            kind = ?output_format.kind(),
            "Service: Job accepted"
        );
        Ok(SubmitResponse {
            job_id,
            status: job.status.to_string(),
        })
    }

    fn validate_request(request: &ConversionRequest) -> Result<MediaFormat, ServiceError> {
        if let Err(validation_errors) = request.validate() {
            let messages: Vec<String> = validation_errors
                .field_errors()
                .values()
                .flat_map(|errors| {
                    errors.iter().map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| "Validation error".to_string())
                    })
                })
                .collect();
            return Err(ServiceError::Validation(messages.join("; ")));
        }

        request.target_format().ok_or_else(|| {
            ServiceError::Validation(format!("Unsupported output format: {}", request.output_format))
        })
    }

    /// Current status of a job
    pub fn status(&self, job_id: &JobId) -> Result<JobStatusResponse, ServiceError> {
        self.registry
            .get(job_id)
            .map(|job| JobStatusResponse::from(&job))
            .ok_or(ServiceError::NotFound(*job_id))
    }

    /// Open the converted output of a finished job
    ///
    /// Never serves anything unless the job is `done`. The file is handed
    /// back open so the caller can stream it without buffering.
    pub async fn download(&self, job_id: &JobId) -> Result<DownloadFile, ServiceError> {
        let job = self
            .registry
            .get(job_id)
            .ok_or(ServiceError::NotFound(*job_id))?;
        if job.status != JobStatus::Done {
            return Err(ServiceError::NotReady(*job_id));
        }

        let file = match tokio::fs::File::open(&job.output_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ServiceError::OutputMissing(*job_id))
            }
            Err(e) => return Err(ServiceError::Storage(e)),
        };
        let len = file.metadata().await?.len();

        let file_name = job
            .output_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| job_id.to_string());

        Ok(DownloadFile {
            file_name,
            content_type: job.output_format.mime_type(),
            len,
            file,
        })
    }

    /// Forget a finished job and delete its files
    pub async fn cleanup(&self, job_id: &JobId) -> Result<CleanupResponse, ServiceError> {
        let (input_path, output_path) =
            self.registry
                .remove_and_collect_paths(job_id)
                .map_err(|e| match e {
                    RegistryError::NotFound(id) => ServiceError::NotFound(id),
                    RegistryError::StillProcessing(id) => ServiceError::NotReady(id),
                    RegistryError::Duplicate(_) => ServiceError::Internal(e.to_string()),
                })?;

        remove_if_present(&input_path).await;
        remove_if_present(&output_path).await;
        info!("Service: Job {} cleaned up", job_id);

        Ok(CleanupResponse {
            job_id: *job_id,
            message: "Job files deleted".to_string(),
        })
    }

    /// Readiness: both storage directories must exist
    pub async fn storage_ready(&self) -> Result<(), String> {
        for dir in [self.pipeline.upload_dir(), self.output_dir.as_path()] {
            match tokio::fs::metadata(dir).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => return Err(format!("{} is not a directory", dir.display())),
                Err(e) => return Err(format!("{}: {}", dir.display(), e)),
            }
        }
        Ok(())
    }
}

async fn remove_if_present(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to delete {}: {}", path.display(), e);
        }
    }
}
