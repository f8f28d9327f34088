use thiserror::Error;

use crate::driver::TaskState;
use crate::scheduler::job::JobState;

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A status event or repository transition referenced a task this
    /// scheduler has no record of. Recoverable: log and drop.
    #[error("No job found for task: {0}")]
    JobNotFound(String),

    /// The application a queued job was submitted under no longer exists.
    /// The job is cancelled before admission.
    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    /// The lifecycle table observed a (state, status) pair it declares
    /// impossible. Fatal to the scheduling subsystem.
    #[error("Lifecycle invariant violated: job in {state} got task status {status:?}")]
    InvariantViolation { state: JobState, status: TaskState },

    #[error("Unsupported resource manager version: {0}")]
    UnsupportedVersion(String),

    #[error("Framework identity mismatch: stored {stored}, offered {offered}")]
    FrameworkIdMismatch { stored: String, offered: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
