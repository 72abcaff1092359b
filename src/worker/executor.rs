use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::transcoder::{ToolOutput, Transcoder};
use crate::jobs::{JobId, JobRegistry, JobStatus, Transition};

const MAX_REASON_LEN: usize = 512;

/// One scheduled conversion
#[derive(Debug, Clone)]
pub struct ConversionTask {
    pub job_id: JobId,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

/// Runs the transcoder for a job and records the terminal status
///
/// This is the end of the execution chain: every outcome, including a
/// panic inside the transcoder, ends up as a registry transition.
pub struct ConversionExecutor {
    registry: Arc<JobRegistry>,
    transcoder: Arc<dyn Transcoder>,
}

impl ConversionExecutor {
    pub fn new(registry: Arc<JobRegistry>, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            registry,
            transcoder,
        }
    }

    pub async fn convert(&self, task: &ConversionTask) {
        info!(job_id = %task.job_id, "Starting conversion");

        let run = self.transcoder.transcode(&task.input_path, &task.output_path);
        let status = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(output)) if output.success() => JobStatus::Done,
            Ok(Ok(output)) => {
                let reason = failure_reason(self.transcoder.name(), &output);
                warn!(job_id = %task.job_id, code = ?output.code, reason = %reason, "Conversion tool failed");
                JobStatus::failed(reason)
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                warn!(job_id = %task.job_id, error = %e, "Conversion timed out");
                JobStatus::failed(e.to_string())
            }
            Ok(Err(e)) => {
                error!(job_id = %task.job_id, error = %e, "Conversion tool could not be run");
                JobStatus::failed("conversion could not be started")
            }
            Err(_) => {
                error!(job_id = %task.job_id, "Conversion panicked");
                JobStatus::failed("unexpected conversion error")
            }
        };

        self.finish(task.job_id, status);
    }

    /// Fail a task that will never run
    pub fn abandon(&self, task: &ConversionTask, reason: &str) {
        warn!(job_id = %task.job_id, reason, "Abandoning conversion");
        self.finish(task.job_id, JobStatus::failed(reason));
    }

    fn finish(&self, job_id: JobId, status: JobStatus) {
        let rendered = status.to_string();
        match self.registry.set_terminal(&job_id, status) {
            Transition::Applied => info!(job_id = %job_id, status = %rendered, "Conversion finished"),
            Transition::AlreadyTerminal => {
                warn!(job_id = %job_id, "Job already had a terminal status, keeping it")
            }
            Transition::Missing => warn!(job_id = %job_id, "Finished conversion for unknown job"),
            Transition::Rejected => error!(job_id = %job_id, "Executor produced a non-terminal status"),
        }
    }
}

/// Condense the tool's error stream into a single stored line
pub fn failure_reason(tool: &str, output: &ToolOutput) -> String {
    let cleaned: Vec<String> = output
        .stderr
        .lines()
        .map(|line| {
            line.chars()
                .map(|c| if c.is_control() { ' ' } else { c })
                .collect::<String>()
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect();

    if cleaned.is_empty() {
        return match output.code {
            Some(code) => format!("{} exited with status {}", tool, code),
            None => format!("{} was terminated by a signal", tool),
        };
    }

    let joined = cleaned.join("; ");
    if joined.chars().count() <= MAX_REASON_LEN {
        joined
    } else {
        let mut truncated: String = joined.chars().take(MAX_REASON_LEN - 3).collect();
        truncated.push_str("...");
        truncated
    }
}
