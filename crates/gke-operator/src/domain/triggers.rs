//! Trigger descriptors and the executor that runs them.

use std::sync::Arc;

use api_types::CompletionEvent;
use api_types::PollSession;
use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;
use trigger_runtime::TriggerExecutor;

use crate::domain::control_plane::OperationControlPlane;
use crate::domain::pod::PodProbe;
use crate::domain::pod::PodSessionFactory;
use crate::domain::pod::PodWatch;
use crate::domain::poller::OperationPoller;
use crate::domain::poller::OperationProbe;
use crate::domain::poller::PollerConfig;

/// Everything a deferred task can wait on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerDescriptor {
    /// A cluster create or delete operation
    Operation(PollSession),
    /// A pod started on a resolved cluster endpoint
    PodWatch(PodWatch),
}

/// Runs [`TriggerDescriptor`]s, rebuilding live clients from the descriptor each time.
pub struct GkeTriggerExecutor {
    control_plane: Arc<dyn OperationControlPlane>,
    pod_sessions: Arc<dyn PodSessionFactory>,
    poller: PollerConfig,
}

impl GkeTriggerExecutor {
    pub fn new(
        control_plane: Arc<dyn OperationControlPlane>,
        pod_sessions: Arc<dyn PodSessionFactory>,
        poller: PollerConfig,
    ) -> Self {
        Self {
            control_plane,
            pod_sessions,
            poller,
        }
    }
}

#[async_trait]
impl TriggerExecutor<TriggerDescriptor> for GkeTriggerExecutor {
    async fn run(&self, descriptor: &TriggerDescriptor) -> CompletionEvent {
        match descriptor {
            TriggerDescriptor::Operation(session) => {
                let probe = OperationProbe::new(self.control_plane.clone(), session);
                OperationPoller::new(probe, session.poll_interval(), self.poller.clone())
                    .run()
                    .await
            }
            TriggerDescriptor::PodWatch(watch) => {
                let api = match self.pod_sessions.connect(&watch.connection_info()).await {
                    Ok(api) => api,
                    Err(report) => {
                        warn!("Cannot watch pod {}: {report:?}", watch.pod());
                        return CompletionEvent::error(report.current_context().to_string());
                    }
                };
                let probe = PodProbe::new(
                    api,
                    watch.pod(),
                    watch.started_at,
                    std::time::Duration::from_secs(watch.startup_timeout_seconds),
                );
                OperationPoller::new(probe, watch.poll_interval(), self.poller.clone())
                    .run()
                    .await
            }
        }
    }
}
