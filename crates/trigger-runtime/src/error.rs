//! Error types for the trigger runtime.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

/// Result type for trigger runtime operations.
pub type TriggerResult<T> = Result<T, Report<TriggerError>>;

/// Errors that can occur while registering, cancelling or persisting triggers.
#[derive(Debug, Display)]
pub enum TriggerError {
    /// No trigger is registered under this id
    #[display("Trigger {id} not found")]
    NotFound { id: String },

    /// The trigger already delivered its event or was cancelled
    #[display("Trigger {id} already finished")]
    AlreadyFinished { id: String },

    /// Continuation could not be encoded or decoded
    #[display("Serialization error: {message}")]
    Serialization { message: String },

    /// Runtime no longer accepts triggers
    #[display("Trigger runtime is shutting down")]
    ShuttingDown,
}

impl Error for TriggerError {}
