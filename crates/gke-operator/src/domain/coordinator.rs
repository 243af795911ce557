//! Cluster create/delete lifecycle.
//!
//! A request is validated, submitted once, and then either polled to
//! completion in the calling task or handed off as a [`Continuation`] that a
//! trigger watches while the task is suspended. Either path ends in the same
//! completion handling, so a synchronous run and a resumed run return the
//! same link for the same remote outcome.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use api_types::ClusterLocation;
use api_types::CompletionEvent;
use api_types::OperationHandle;
use api_types::PollSession;
use error_stack::bail;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;
use tracing::info;
use tracing::instrument;
use tracing::warn;
use trigger_runtime::Continuation;
use trigger_runtime::ResumeKwargs;

use crate::domain::control_plane::ControlPlaneError;
use crate::domain::control_plane::OperationControlPlane;
use crate::domain::error::LifecycleError;
use crate::domain::poller::OperationPoller;
use crate::domain::poller::OperationProbe;
use crate::domain::poller::PollerConfig;
use crate::domain::request::CreateClusterRequest;
use crate::domain::request::DeleteClusterRequest;
use crate::domain::request::OperationRequest;
use crate::domain::triggers::TriggerDescriptor;

pub type LifecycleResult<T> = Result<T, Report<LifecycleError>>;

/// How a task waits for its remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Poll in the calling task, optionally bounded by a deadline
    Synchronous { timeout: Option<Duration> },
    /// Suspend and let a trigger watch the operation
    Deferred,
}

/// What a task returns: a final value, or a continuation to suspend on.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
    Complete(T),
    Deferred(Continuation<TriggerDescriptor>),
}

impl<T> TaskOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TaskOutcome<U> {
        match self {
            Self::Complete(value) => TaskOutcome::Complete(f(value)),
            Self::Deferred(continuation) => TaskOutcome::Deferred(continuation),
        }
    }
}

/// Named entrypoints a suspended task can be resumed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResumeEntrypoint {
    ClusterCreated,
    ClusterDeleted,
    PodFinished,
}

impl ResumeEntrypoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClusterCreated => "cluster_create_complete",
            Self::ClusterDeleted => "cluster_delete_complete",
            Self::PodFinished => "pod_complete",
        }
    }
}

impl FromStr for ResumeEntrypoint {
    type Err = Report<LifecycleError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cluster_create_complete" => Ok(Self::ClusterCreated),
            "cluster_delete_complete" => Ok(Self::ClusterDeleted),
            "pod_complete" => Ok(Self::PodFinished),
            other => bail!(LifecycleError::InvalidResume {
                message: format!("unknown resume entrypoint '{other}'"),
            }),
        }
    }
}

/// Which operation a link is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum OperationKind {
    #[display("create")]
    Create,
    #[display("delete")]
    Delete,
}

impl OperationKind {
    fn entrypoint(self) -> ResumeEntrypoint {
        match self {
            Self::Create => ResumeEntrypoint::ClusterCreated,
            Self::Delete => ResumeEntrypoint::ClusterDeleted,
        }
    }

    /// Create returns the cluster it made, delete the operation that removed it.
    fn link(self, handle: OperationHandle) -> String {
        match self {
            Self::Create => handle.target_link,
            Self::Delete => handle.self_link,
        }
    }
}

/// Lifecycle phase, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum LifecyclePhase {
    Validating,
    Submitted,
    /// Finished without an operation: the cluster already existed or was already gone
    Resolved,
    Polling,
    Deferred,
    Terminal,
}

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub poll_interval: Duration,
    pub poller: PollerConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            poller: PollerConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }
}

/// Outcome of the single submission call.
enum Submission {
    Started(OperationHandle),
    /// Nothing to wait for; carries the final link if there is one
    Resolved(Option<String>),
}

/// Kwargs carried by a cluster continuation.
#[derive(Debug, Deserialize)]
struct OperationResumeParams {
    project_id: String,
    location: String,
}

/// Drives cluster create and delete requests to completion.
pub struct ClusterLifecycleCoordinator {
    control_plane: Arc<dyn OperationControlPlane>,
    config: CoordinatorConfig,
}

impl ClusterLifecycleCoordinator {
    pub fn new(control_plane: Arc<dyn OperationControlPlane>, config: CoordinatorConfig) -> Self {
        Self {
            control_plane,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Create a cluster, returning the link of the cluster.
    ///
    /// A cluster that already exists is not an error: its link is returned
    /// without waiting on anything.
    #[instrument(skip_all, fields(location = %request.location))]
    pub async fn create_cluster(
        &self,
        request: CreateClusterRequest,
        mode: ExecutionMode,
    ) -> LifecycleResult<TaskOutcome<String>> {
        log_phase(LifecyclePhase::Validating);
        let request = request.validate()?;

        let outcome = self.run(OperationKind::Create, &request, mode).await?;
        match outcome {
            TaskOutcome::Complete(Some(link)) => Ok(TaskOutcome::Complete(link)),
            TaskOutcome::Complete(None) => bail!(LifecycleError::OperationFailed {
                message: format!("Create of cluster {} returned no link", request.cluster_name()),
            }),
            TaskOutcome::Deferred(continuation) => Ok(TaskOutcome::Deferred(continuation)),
        }
    }

    /// Delete a cluster, returning the delete operation's link.
    ///
    /// `None` means the cluster was already gone and nothing was submitted.
    #[instrument(skip_all, fields(location = %request.location, cluster = %request.name))]
    pub async fn delete_cluster(
        &self,
        request: DeleteClusterRequest,
        mode: ExecutionMode,
    ) -> LifecycleResult<TaskOutcome<Option<String>>> {
        log_phase(LifecyclePhase::Validating);
        let request = request.validate()?;
        self.run(OperationKind::Delete, &request, mode).await
    }

    async fn run(
        &self,
        kind: OperationKind,
        request: &OperationRequest,
        mode: ExecutionMode,
    ) -> LifecycleResult<TaskOutcome<Option<String>>> {
        let handle = match self.submit(request).await? {
            Submission::Started(handle) => handle,
            Submission::Resolved(link) => {
                log_phase(LifecyclePhase::Resolved);
                return Ok(TaskOutcome::Complete(link));
            }
        };
        log_phase(LifecyclePhase::Submitted);

        let location = request.location();
        let session = PollSession::new(handle.name.clone(), location, self.config.poll_interval);

        match mode {
            ExecutionMode::Synchronous { timeout } => {
                log_phase(LifecyclePhase::Polling);
                let event = self.poll(&session, timeout).await?;
                let link = self.complete(kind, location, &event).await?;
                Ok(TaskOutcome::Complete(Some(link)))
            }
            ExecutionMode::Deferred => {
                log_phase(LifecyclePhase::Deferred);
                info!(operation = %handle.name, "Suspending until the operation finishes");
                let continuation = Continuation::new(
                    TriggerDescriptor::Operation(session),
                    kind.entrypoint().as_str(),
                )
                .with_kwarg("project_id", location.project_id.clone())
                .with_kwarg("location", location.location.clone());
                Ok(TaskOutcome::Deferred(continuation))
            }
        }
    }

    async fn submit(&self, request: &OperationRequest) -> LifecycleResult<Submission> {
        match request {
            OperationRequest::Create {
                location,
                spec,
                idempotency_key,
            } => {
                info!(cluster = %spec.name, idempotency_key, "Submitting cluster create");
                match self
                    .control_plane
                    .submit_create(location, spec, idempotency_key)
                    .await
                {
                    Ok(handle) => Ok(Submission::Started(handle)),
                    Err(report)
                        if matches!(
                            report.current_context(),
                            ControlPlaneError::AlreadyExists { .. }
                        ) =>
                    {
                        info!("Assuming Success: {}", report.current_context());
                        let cluster = self
                            .control_plane
                            .get_cluster(location, &spec.name)
                            .await
                            .change_context_lazy(|| control_plane_failure("get existing cluster"))?;
                        Ok(Submission::Resolved(Some(cluster.self_link)))
                    }
                    Err(report) => {
                        Err(report.change_context(control_plane_failure("submit cluster create")))
                    }
                }
            }
            OperationRequest::Delete {
                location,
                cluster_name,
                idempotency_key,
            } => {
                info!(cluster = %cluster_name, idempotency_key, "Submitting cluster delete");
                let handle = self
                    .control_plane
                    .submit_delete(location, cluster_name)
                    .await
                    .change_context_lazy(|| control_plane_failure("submit cluster delete"))?;
                match handle {
                    Some(handle) => Ok(Submission::Started(handle)),
                    None => {
                        info!("Cluster {cluster_name} is already gone, nothing to delete");
                        Ok(Submission::Resolved(None))
                    }
                }
            }
        }
    }

    async fn poll(
        &self,
        session: &PollSession,
        timeout: Option<Duration>,
    ) -> LifecycleResult<CompletionEvent> {
        let probe = OperationProbe::new(self.control_plane.clone(), session);
        let poller = OperationPoller::new(probe, session.poll_interval(), self.config.poller.clone());

        match timeout {
            Some(limit) => tokio::time::timeout(limit, poller.run())
                .await
                .map_err(|_| {
                    warn!(operation = %session.operation_name, "Operation wait timed out");
                    Report::new(LifecycleError::Timeout {
                        seconds: limit.as_secs(),
                    })
                }),
            None => Ok(poller.run().await),
        }
    }

    /// Resume a suspended cluster task with its trigger's completion event.
    #[instrument(skip(self, event, kwargs), fields(status = %event.status))]
    pub async fn on_poll_complete(
        &self,
        kind: OperationKind,
        event: &CompletionEvent,
        kwargs: &ResumeKwargs,
    ) -> LifecycleResult<String> {
        let params: OperationResumeParams =
            serde_json::from_value(serde_json::Value::Object(kwargs.clone())).change_context(
                LifecycleError::InvalidResume {
                    message: "cluster operation kwargs need project_id and location".into(),
                },
            )?;
        let location = ClusterLocation::new(params.project_id, params.location);
        self.complete(kind, &location, event).await
    }

    async fn complete(
        &self,
        kind: OperationKind,
        location: &ClusterLocation,
        event: &CompletionEvent,
    ) -> LifecycleResult<String> {
        log_phase(LifecyclePhase::Terminal);
        if event.is_failure() {
            bail!(LifecycleError::from_failed_event(event));
        }

        let Some(operation_name) = event.operation_name.as_deref() else {
            bail!(LifecycleError::OperationFailed {
                message: "Completion event carries no operation name".into(),
            });
        };
        info!("{}", event.message);

        let handle = self
            .control_plane
            .get_operation(location, operation_name)
            .await
            .change_context_lazy(|| control_plane_failure("get finished operation"))?;
        Ok(kind.link(handle))
    }
}

fn control_plane_failure(action: &str) -> LifecycleError {
    LifecycleError::ControlPlane {
        message: format!("failed to {action}"),
    }
}

fn log_phase(phase: LifecyclePhase) {
    info!(%phase, "Cluster lifecycle transition");
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn entrypoints_parse_back() {
        for entrypoint in [
            ResumeEntrypoint::ClusterCreated,
            ResumeEntrypoint::ClusterDeleted,
            ResumeEntrypoint::PodFinished,
        ] {
            let parsed: ResumeEntrypoint = entrypoint.as_str().parse().expect("should parse");
            assert_eq!(parsed, entrypoint);
        }

        let err = "execute_complete"
            .parse::<ResumeEntrypoint>()
            .expect_err("unknown entrypoint should fail");
        assert!(matches!(
            err.current_context(),
            LifecycleError::InvalidResume { .. }
        ));
    }

    #[test]
    fn links_follow_operation_kind() {
        let handle = OperationHandle {
            name: "operation-1".into(),
            self_link: "ops/operation-1".into(),
            target_link: "clusters/c1".into(),
        };
        assert_eq!(OperationKind::Create.link(handle.clone()), "clusters/c1");
        assert_eq!(OperationKind::Delete.link(handle), "ops/operation-1");
    }
}
