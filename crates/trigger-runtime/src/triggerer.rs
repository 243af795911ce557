//! Trigger runner for deferred executions.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use api_types::CompletionEvent;
use chrono::DateTime;
use chrono::Utc;
use error_stack::bail;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::config::TriggererConfig;
use crate::error::TriggerError;
use crate::error::TriggerResult;
use crate::types::Continuation;
use crate::types::ResumeHandler;
use crate::types::Resumption;
use crate::types::TriggerExecutor;
use crate::types::TriggerId;
use crate::types::TriggerState;

/// Bookkeeping for one registered continuation.
#[derive(Debug)]
struct TriggerEntry<D> {
    continuation: Continuation<D>,
    state: TriggerState,
    token: CancellationToken,
    registered_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Registry<D> {
    entries: HashMap<TriggerId, TriggerEntry<D>>,
    /// Finished triggers, oldest first
    finished: VecDeque<TriggerId>,
}

impl<D: Clone> Registry<D> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            finished: VecDeque::new(),
        }
    }

    /// Moves a running trigger into `state`.
    ///
    /// Returns the continuation only for the caller that performed the
    /// transition, so a trigger resolves at most once.
    fn finish(
        &mut self,
        id: TriggerId,
        state: TriggerState,
        max_history_size: usize,
    ) -> Option<Continuation<D>> {
        let entry = self.entries.get_mut(&id)?;
        if entry.state != TriggerState::Running {
            return None;
        }

        entry.state = state;
        entry.finished_at = Some(Utc::now());
        let continuation = entry.continuation.clone();

        self.finished.push_back(id);
        while self.finished.len() > max_history_size {
            if let Some(evicted) = self.finished.pop_front() {
                self.entries.remove(&evicted);
            }
        }

        Some(continuation)
    }

    fn stats(&self) -> TriggerStats {
        let count = |state| self.entries.values().filter(|e| e.state == state).count();
        TriggerStats {
            running: count(TriggerState::Running),
            fired: count(TriggerState::Fired),
            cancelled: count(TriggerState::Cancelled),
            oldest_running: self
                .entries
                .values()
                .filter(|e| e.state == TriggerState::Running)
                .map(|e| e.registered_at)
                .min(),
        }
    }
}

/// Statistics for the trigger runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerStats {
    pub running: usize,
    pub fired: usize,
    pub cancelled: usize,
    pub oldest_running: Option<DateTime<Utc>>,
}

/// Runs deferred triggers as independent tokio tasks.
///
/// Each registered continuation gets its own task. When the trigger finishes,
/// its completion event is handed to the [`ResumeHandler`] exactly once; a
/// cancelled trigger delivers nothing.
pub struct Triggerer<D> {
    config: TriggererConfig,
    executor: Arc<dyn TriggerExecutor<D>>,
    handler: Arc<dyn ResumeHandler>,
    registry: Arc<RwLock<Registry<D>>>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl<D> Triggerer<D>
where D: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static
{
    /// Create a new triggerer.
    pub fn new(
        executor: Arc<dyn TriggerExecutor<D>>,
        handler: Arc<dyn ResumeHandler>,
    ) -> Self {
        Self::with_config(TriggererConfig::default(), executor, handler)
    }

    /// Create a new triggerer with custom configuration.
    pub fn with_config(
        config: TriggererConfig,
        executor: Arc<dyn TriggerExecutor<D>>,
        handler: Arc<dyn ResumeHandler>,
    ) -> Self {
        info!(
            trigger_timeout = ?config.trigger_timeout,
            max_history_size = config.max_history_size,
            "Triggerer created"
        );

        Self {
            config,
            executor,
            handler,
            registry: Arc::new(RwLock::new(Registry::new())),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a continuation and start its trigger.
    #[instrument(skip(self, continuation), fields(entrypoint = %continuation.resume_entrypoint))]
    pub async fn register(&self, continuation: Continuation<D>) -> TriggerResult<TriggerId> {
        if self.shutdown.is_cancelled() {
            bail!(TriggerError::ShuttingDown);
        }

        let id = TriggerId::new();
        let token = self.shutdown.child_token();
        let descriptor = continuation.trigger.clone();

        self.registry.write().await.entries.insert(id, TriggerEntry {
            continuation,
            state: TriggerState::Running,
            token: token.clone(),
            registered_at: Utc::now(),
            finished_at: None,
        });

        self.tasks.spawn(run_trigger(
            id,
            descriptor,
            token,
            self.config.clone(),
            self.executor.clone(),
            self.handler.clone(),
            self.registry.clone(),
        ));

        debug!(trigger_id = %id, "Trigger registered");
        Ok(id)
    }

    /// Tear down a running trigger without delivering an event.
    ///
    /// The continuation is handed back so the caller can run cleanup for the
    /// suspended execution.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: TriggerId) -> TriggerResult<Continuation<D>> {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.entries.get(&id) else {
            bail!(TriggerError::NotFound { id: id.to_string() });
        };
        let token = entry.token.clone();

        match registry.finish(id, TriggerState::Cancelled, self.config.max_history_size) {
            Some(continuation) => {
                token.cancel();
                info!(trigger_id = %id, "Trigger cancelled");
                Ok(continuation)
            }
            None => bail!(TriggerError::AlreadyFinished { id: id.to_string() }),
        }
    }

    /// State of a trigger, if it is still tracked.
    pub async fn state(&self, id: TriggerId) -> Option<TriggerState> {
        self.registry.read().await.entries.get(&id).map(|e| e.state)
    }

    /// Get runtime statistics.
    pub async fn stats(&self) -> TriggerStats {
        self.registry.read().await.stats()
    }

    /// Number of trigger tasks that have not exited yet.
    ///
    /// Finished tasks are dropped from the tracker as they exit.
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Stop accepting triggers, cancel the running ones and wait for their tasks.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        let grace = self.config.shutdown_grace;

        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            warn!("Trigger shutdown timed out after {:?}", grace);
        }
        info!("Triggerer shut down");
    }
}

async fn run_trigger<D>(
    id: TriggerId,
    descriptor: D,
    token: CancellationToken,
    config: TriggererConfig,
    executor: Arc<dyn TriggerExecutor<D>>,
    handler: Arc<dyn ResumeHandler>,
    registry: Arc<RwLock<Registry<D>>>,
) where
    D: Clone + Send + Sync + 'static,
{
    let run = async {
        match config.trigger_timeout {
            Some(limit) => tokio::time::timeout(limit, executor.run(&descriptor))
                .await
                .unwrap_or_else(|_| timed_out(limit)),
            None => executor.run(&descriptor).await,
        }
    };

    let event = tokio::select! {
        _ = token.cancelled() => {
            debug!(trigger_id = %id, "Trigger task stopped by cancellation");
            return;
        }
        event = run => event,
    };

    let fired = registry
        .write()
        .await
        .finish(id, TriggerState::Fired, config.max_history_size);

    match fired {
        Some(continuation) => {
            info!(trigger_id = %id, status = %event.status, "Trigger fired");
            handler
                .resume(Resumption {
                    trigger_id: id,
                    entrypoint: continuation.resume_entrypoint,
                    kwargs: continuation.resume_kwargs,
                    event,
                })
                .await;
        }
        None => {
            debug!(trigger_id = %id, "Trigger finished after cancellation, event dropped");
        }
    }
}

fn timed_out(limit: Duration) -> CompletionEvent {
    CompletionEvent::error(format!("Trigger timed out after {}s", limit.as_secs()))
}
