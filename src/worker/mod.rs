pub mod executor;
pub mod job_worker;
pub mod transcoder;

pub use executor::{ConversionExecutor, ConversionTask};
pub use job_worker::{ConversionQueue, JobWorker, TaskReceiver};
pub use transcoder::{FfmpegTranscoder, ToolOutput, Transcoder};
