//! Common types for deferred execution.

use api_types::CompletionEvent;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use error_stack::ResultExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::TriggerError;
use crate::error::TriggerResult;

/// Keyword arguments handed back to the resume entrypoint.
pub type ResumeKwargs = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for registered triggers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
pub struct TriggerId(pub Uuid);

impl TriggerId {
    /// Create a new random trigger ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TriggerId {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a registered trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerState {
    /// Trigger is polling
    Running,
    /// Trigger delivered its completion event
    Fired,
    /// Trigger was torn down before it finished
    Cancelled,
}

/// A suspended execution: what to watch, and where to resume once it is done.
///
/// Everything in here is plain serializable data so the record can be written
/// to durable storage and picked up again by another process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Continuation<D> {
    /// Serializable trigger parameters
    pub trigger: D,
    /// Name of the entrypoint to invoke with the completion event
    pub resume_entrypoint: String,
    /// Extra parameters passed back to the entrypoint
    #[serde(default)]
    pub resume_kwargs: ResumeKwargs,
    /// When the execution suspended
    pub deferred_at: DateTime<Utc>,
}

impl<D> Continuation<D>
where D: Serialize + DeserializeOwned
{
    pub fn new(trigger: D, resume_entrypoint: impl Into<String>) -> Self {
        Self {
            trigger,
            resume_entrypoint: resume_entrypoint.into(),
            resume_kwargs: ResumeKwargs::new(),
            deferred_at: Utc::now(),
        }
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.resume_kwargs.insert(key.into(), value.into());
        self
    }

    /// Encode for a durable trigger record.
    pub fn to_json(&self) -> TriggerResult<String> {
        serde_json::to_string(self).change_context(TriggerError::Serialization {
            message: "Failed to serialize continuation".into(),
        })
    }

    /// Decode a durable trigger record.
    pub fn from_json(json: &str) -> TriggerResult<Self> {
        serde_json::from_str(json).change_context(TriggerError::Serialization {
            message: "Failed to deserialize continuation".into(),
        })
    }
}

/// Runs a trigger described by `D` until it reaches a terminal state.
///
/// Implementations rebuild every live resource they need from the descriptor.
/// They do not need to watch for cancellation: the runtime drops the future.
#[async_trait]
pub trait TriggerExecutor<D>: Send + Sync + 'static {
    async fn run(&self, descriptor: &D) -> CompletionEvent;
}

/// Receives the single completion event of a continuation.
#[async_trait]
pub trait ResumeHandler: Send + Sync + 'static {
    async fn resume(&self, resumption: Resumption);
}

/// Everything a resume entrypoint is invoked with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resumption {
    pub trigger_id: TriggerId,
    pub entrypoint: String,
    pub kwargs: ResumeKwargs,
    pub event: CompletionEvent,
}

#[async_trait]
impl ResumeHandler for mpsc::UnboundedSender<Resumption> {
    async fn resume(&self, resumption: Resumption) {
        if let Err(e) = self.send(resumption) {
            tracing::warn!(trigger_id = %e.0.trigger_id, "Resume receiver dropped, event discarded");
        }
    }
}
