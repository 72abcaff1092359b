pub mod models;
pub mod registry;

pub use models::{Job, JobId, JobStatus};
pub use registry::{JobRegistry, RegistryError, Transition};
