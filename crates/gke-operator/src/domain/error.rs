use core::error::Error;

use api_types::CompletionEvent;
use api_types::FailureReason;

/// Errors surfaced to the workflow by cluster and pod operations.
#[derive(Debug, derive_more::Display)]
pub enum LifecycleError {
    /// Bad request shape, caught before anything is submitted
    #[display("Invalid request: {message}")]
    Validation { message: String },
    /// Forbidden or ambiguous parameter combination, caught at construction
    #[display("Invalid configuration: {message}")]
    Config { message: String },
    /// The remote operation reached a terminal failure; message passed through verbatim
    #[display("{message}")]
    OperationFailed { message: String },
    /// Transient lookup failures exhausted the retry budget
    #[display("Polling gave up: {message}")]
    PollExhausted { message: String },
    /// Synchronous wait exceeded the caller's deadline
    #[display("Operation did not finish within {seconds}s")]
    Timeout { seconds: u64 },
    #[display("Control plane request failed: {message}")]
    ControlPlane { message: String },
    #[display("Pod session failed: {message}")]
    PodSession { message: String },
    /// Continuation parameters could not be decoded on resume
    #[display("Invalid resume parameters: {message}")]
    InvalidResume { message: String },
}

impl Error for LifecycleError {}

impl LifecycleError {
    /// Maps a failed or errored completion event onto the error the task raises.
    pub fn from_failed_event(event: &CompletionEvent) -> Self {
        match event.reason {
            Some(FailureReason::Unreachable) => Self::PollExhausted {
                message: event.message.clone(),
            },
            None => Self::OperationFailed {
                message: event.message.clone(),
            },
        }
    }
}
