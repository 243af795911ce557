use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use anyhow::Result;
use api_types::ClusterLocation;
use k8s_openapi::api::core::v1::Pod;
use serde_json::Map;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;
use trigger_runtime::Continuation;
use trigger_runtime::TriggerId;
use trigger_runtime::Triggerer;
use trigger_runtime::TriggererConfig;

use crate::app::dispatcher::ResumeDispatcher;
use crate::app::services::ApplicationServices;
use crate::config::document::load_document;
use crate::config::Commands;
use crate::config::CreateClusterArgs;
use crate::config::DeleteClusterArgs;
use crate::config::GlobalArgs;
use crate::config::StartPodArgs;
use crate::domain::bridge::PodExecutionBridge;
use crate::domain::bridge::PodLaunchConfig;
use crate::domain::coordinator::ClusterLifecycleCoordinator;
use crate::domain::coordinator::CoordinatorConfig;
use crate::domain::coordinator::TaskOutcome;
use crate::domain::request::ClusterBody;
use crate::domain::request::CreateClusterRequest;
use crate::domain::request::DeleteClusterRequest;
use crate::domain::triggers::GkeTriggerExecutor;
use crate::domain::triggers::TriggerDescriptor;

/// Runs one command: submit, then wait in place or through a trigger.
pub struct Application {
    services: ApplicationServices,
    global: GlobalArgs,
}

impl Application {
    pub fn new(services: ApplicationServices, global: GlobalArgs) -> Self {
        Self { services, global }
    }

    pub fn services(&self) -> &ApplicationServices {
        &self.services
    }

    /// Run a command to completion, returning its resulting link or pod name.
    pub async fn run(&self, command: Commands) -> Result<Option<String>> {
        match command {
            Commands::CreateCluster(args) => self.create_cluster(*args).await,
            Commands::DeleteCluster(args) => self.delete_cluster(args).await,
            Commands::StartPod(args) => self.start_pod(*args).await,
        }
    }

    fn location(&self) -> ClusterLocation {
        ClusterLocation::new(self.global.project_id.clone(), self.global.location.clone())
    }

    fn coordinator(&self, poll_interval_secs: u64) -> Arc<ClusterLifecycleCoordinator> {
        let config = CoordinatorConfig::default()
            .with_poll_interval(Duration::from_secs(poll_interval_secs))
            .with_poller(self.global.poller_config());
        Arc::new(ClusterLifecycleCoordinator::new(
            self.services.control_plane.clone(),
            config,
        ))
    }

    async fn create_cluster(&self, args: CreateClusterArgs) -> Result<Option<String>> {
        let body: Map<String, Value> = load_document(&args.body)
            .map_err(|e| anyhow!("Failed to load cluster body: {e:?}"))?;

        let mut request = CreateClusterRequest::new(self.location(), ClusterBody::Mapping(body));
        if let Some(key) = args.idempotency_key {
            request = request.with_idempotency_key(key);
        }

        let coordinator = self.coordinator(args.poll_interval_secs);
        let outcome = coordinator
            .create_cluster(request, args.wait.mode())
            .await
            .map_err(|e| anyhow!("Cluster create failed: {e:?}"))?;

        self.settle(outcome.map(Some), coordinator, None).await
    }

    async fn delete_cluster(&self, args: DeleteClusterArgs) -> Result<Option<String>> {
        let request = DeleteClusterRequest::new(self.location(), args.name);

        let coordinator = self.coordinator(args.poll_interval_secs);
        let outcome = coordinator
            .delete_cluster(request, args.wait.mode())
            .await
            .map_err(|e| anyhow!("Cluster delete failed: {e:?}"))?;

        self.settle(outcome, coordinator, None).await
    }

    async fn start_pod(&self, args: StartPodArgs) -> Result<Option<String>> {
        let pod: Pod =
            load_document(&args.pod).map_err(|e| anyhow!("Failed to load pod manifest: {e:?}"))?;

        let mut config = PodLaunchConfig::new(self.location(), args.cluster_name)
            .with_internal_ip(args.use_internal_ip)
            .with_gcp_conn_id(args.gcp_conn_id)
            .with_namespace(args.namespace)
            .with_poll_interval(Duration::from_secs(args.poll_interval_secs))
            .with_startup_timeout(Duration::from_secs(args.startup_timeout_secs));
        if let Some(path) = args.config_file {
            config = config.with_config_file(path);
        }
        if let Some(action) = args.on_finish_action {
            config = config.with_on_finish_action(action);
        }
        if let Some(delete) = args.is_delete_operator_pod {
            config = config.with_is_delete_operator_pod(delete);
        }
        if let Some(regional) = args.regional {
            config = config.with_regional(regional);
        }

        let bridge = PodExecutionBridge::new(
            config,
            self.services.control_plane.clone(),
            self.services.pod_sessions.clone(),
            self.global.poller_config(),
        )
        .map_err(|e| anyhow!("Invalid pod launch parameters: {e:?}"))?;
        let bridge = Arc::new(bridge);

        let outcome = bridge
            .execute(pod, args.wait.mode())
            .await
            .map_err(|e| anyhow!("Pod execution failed: {e:?}"))?;

        let coordinator = self.coordinator(args.poll_interval_secs);
        self.settle(outcome.map(Some), coordinator, Some(bridge)).await
    }

    async fn settle(
        &self,
        outcome: TaskOutcome<Option<String>>,
        coordinator: Arc<ClusterLifecycleCoordinator>,
        bridge: Option<Arc<PodExecutionBridge>>,
    ) -> Result<Option<String>> {
        match outcome {
            TaskOutcome::Complete(value) => Ok(value),
            TaskOutcome::Deferred(continuation) => {
                self.wait_deferred(continuation, coordinator, bridge).await
            }
        }
    }

    /// Hand the continuation to a triggerer and wait for the resumed task.
    async fn wait_deferred(
        &self,
        continuation: Continuation<TriggerDescriptor>,
        coordinator: Arc<ClusterLifecycleCoordinator>,
        bridge: Option<Arc<PodExecutionBridge>>,
    ) -> Result<Option<String>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = ResumeDispatcher::new(coordinator, bridge.clone(), tx);
        let executor = GkeTriggerExecutor::new(
            self.services.control_plane.clone(),
            self.services.pod_sessions.clone(),
            self.global.poller_config(),
        );

        let mut config = TriggererConfig::default();
        if let Some(secs) = self.global.trigger_timeout_secs {
            config = config.with_trigger_timeout(Duration::from_secs(secs));
        }
        let triggerer =
            Triggerer::<TriggerDescriptor>::with_config(config, Arc::new(executor), Arc::new(dispatcher));

        let record = continuation
            .to_json()
            .map_err(|e| anyhow!("Failed to encode continuation: {e:?}"))?;
        debug!(continuation = %record, "Task suspended");

        let id = triggerer
            .register(continuation)
            .await
            .map_err(|e| anyhow!("Failed to register trigger: {e:?}"))?;
        info!(trigger_id = %id, "Task deferred, waiting for trigger");

        let result = tokio::select! {
            completion = rx.recv() => match completion {
                Some(completion) => completion
                    .result
                    .map_err(|e| anyhow!("Resumed task failed: {e:?}")),
                None => Err(anyhow!("Trigger runtime stopped without a result")),
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling deferred task");
                cancel(&triggerer, id, bridge.as_deref()).await;
                Err(anyhow!("Task cancelled"))
            }
        };

        triggerer.shutdown().await;
        result
    }
}

async fn cancel(
    triggerer: &Triggerer<TriggerDescriptor>,
    id: TriggerId,
    bridge: Option<&PodExecutionBridge>,
) {
    let continuation = match triggerer.cancel(id).await {
        Ok(continuation) => continuation,
        Err(e) => {
            warn!("Trigger could not be cancelled: {e:?}");
            return;
        }
    };

    if let Some(bridge) = bridge {
        if let Err(e) = bridge.on_cancel(&continuation.resume_kwargs).await {
            warn!("Cleanup after cancellation failed: {e:?}");
        }
    }
}
