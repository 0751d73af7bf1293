use thiserror::Error;

/// Failures surfaced by the workflow core.
///
/// `UnknownStep` and `AlreadyPolling` are caller bugs and are not worth
/// retrying. `Submission` and `Poll` come from the vendor and are shown to
/// the user together with a retry action.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StudioError {
    #[error("Unknown workflow step: {0}")]
    UnknownStep(String),

    #[error("Job {0} is already being polled")]
    AlreadyPolling(String),

    #[error("Video generation request failed: {0}")]
    Submission(String),

    #[error(transparent)]
    Poll(#[from] PollError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollError {
    /// The status or result request itself failed (network, HTTP, bad body).
    #[error("Status check failed: {0}")]
    Transient(String),

    /// The vendor reported the job as failed.
    #[error("Video generation failed: {0}")]
    JobFailed(String),
}

impl PollError {
    pub fn detail(&self) -> &str {
        match self {
            PollError::Transient(d) | PollError::JobFailed(d) => d,
        }
    }
}
