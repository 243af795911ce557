//! Routes fired triggers back to the entrypoint their task suspended at.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::error;
use tracing::info;
use trigger_runtime::ResumeHandler;
use trigger_runtime::Resumption;
use trigger_runtime::TriggerId;

use crate::domain::bridge::PodExecutionBridge;
use crate::domain::coordinator::ClusterLifecycleCoordinator;
use crate::domain::coordinator::LifecycleResult;
use crate::domain::coordinator::OperationKind;
use crate::domain::coordinator::ResumeEntrypoint;
use crate::domain::error::LifecycleError;

/// Final result of a resumed task.
#[derive(Debug)]
pub struct TaskCompletion {
    pub trigger_id: TriggerId,
    pub result: LifecycleResult<Option<String>>,
}

/// [`ResumeHandler`] that runs the named entrypoint and reports its result.
pub struct ResumeDispatcher {
    coordinator: Arc<ClusterLifecycleCoordinator>,
    bridge: Option<Arc<PodExecutionBridge>>,
    completions: mpsc::UnboundedSender<TaskCompletion>,
}

impl ResumeDispatcher {
    pub fn new(
        coordinator: Arc<ClusterLifecycleCoordinator>,
        bridge: Option<Arc<PodExecutionBridge>>,
        completions: mpsc::UnboundedSender<TaskCompletion>,
    ) -> Self {
        Self {
            coordinator,
            bridge,
            completions,
        }
    }

    async fn dispatch(&self, resumption: &Resumption) -> LifecycleResult<Option<String>> {
        let entrypoint: ResumeEntrypoint = resumption.entrypoint.parse()?;
        let event = &resumption.event;
        let kwargs = &resumption.kwargs;

        match entrypoint {
            ResumeEntrypoint::ClusterCreated => self
                .coordinator
                .on_poll_complete(OperationKind::Create, event, kwargs)
                .await
                .map(Some),
            ResumeEntrypoint::ClusterDeleted => self
                .coordinator
                .on_poll_complete(OperationKind::Delete, event, kwargs)
                .await
                .map(Some),
            ResumeEntrypoint::PodFinished => {
                let Some(bridge) = &self.bridge else {
                    error_stack::bail!(LifecycleError::InvalidResume {
                        message: "pod task resumed without a pod bridge".into(),
                    });
                };
                bridge.execute_complete(event, kwargs).await.map(Some)
            }
        }
    }
}

#[async_trait]
impl ResumeHandler for ResumeDispatcher {
    async fn resume(&self, resumption: Resumption) {
        info!(
            trigger_id = %resumption.trigger_id,
            entrypoint = %resumption.entrypoint,
            "Resuming task"
        );
        let result = self.dispatch(&resumption).await;
        if let Err(report) = &result {
            error!(trigger_id = %resumption.trigger_id, "Resumed task failed: {report:?}");
        }

        let completion = TaskCompletion {
            trigger_id: resumption.trigger_id,
            result,
        };
        if self.completions.send(completion).is_err() {
            error!("Completion receiver dropped, result discarded");
        }
    }
}
