use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Exit code and captured error stream of one tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// External transcoding tool
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert `input` into `output`, overwriting any existing output
    ///
    /// `Err` means the tool could not be run or waited on at all; a tool that
    /// ran and failed is reported through [`ToolOutput::code`].
    async fn transcode(&self, input: &Path, output: &Path) -> io::Result<ToolOutput>;

    /// Short name used in failure reasons
    fn name(&self) -> &str;
}

/// `ffmpeg` invoked as a child process
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
    timeout: Option<Duration>,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(["-y", "-hide_banner", "-nostdin", "-loglevel", "error", "-i"])
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> io::Result<ToolOutput> {
        let run = self.command(input, output).output();
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("conversion exceeded {} seconds", limit.as_secs()),
                )
            })?,
            None => run.await,
        };

        let output = result?;
        Ok(ToolOutput {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}
