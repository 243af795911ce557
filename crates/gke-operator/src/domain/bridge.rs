//! Running a pod on a cluster whose endpoint is resolved at execution time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use api_types::ClusterConnectionInfo;
use api_types::ClusterLocation;
use api_types::CompletionEvent;
use api_types::whole_poll_seconds;
use chrono::Utc;
use error_stack::bail;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use tracing::info;
use tracing::instrument;
use tracing::warn;
use trigger_runtime::Continuation;
use trigger_runtime::ResumeKwargs;

use crate::domain::control_plane::OperationControlPlane;
use crate::domain::coordinator::ExecutionMode;
use crate::domain::coordinator::LifecycleResult;
use crate::domain::coordinator::ResumeEntrypoint;
use crate::domain::coordinator::TaskOutcome;
use crate::domain::error::LifecycleError;
use crate::domain::pod::OnFinishAction;
use crate::domain::pod::PodApi;
use crate::domain::pod::PodProbe;
use crate::domain::pod::PodRef;
use crate::domain::pod::PodSessionFactory;
use crate::domain::pod::PodWatch;
use crate::domain::poller::OperationPoller;
use crate::domain::poller::PollerConfig;
use crate::domain::triggers::TriggerDescriptor;

pub const DEFAULT_GCP_CONN_ID: &str = "google_cloud_default";

/// Pod launch parameters as the caller supplies them, legacy aliases included.
#[derive(Debug, Clone)]
pub struct PodLaunchConfig {
    pub location: ClusterLocation,
    pub cluster_name: String,
    /// Connect through the cluster's private endpoint
    pub use_internal_ip: bool,
    pub gcp_conn_id: String,
    /// Not supported: the connection is always built from the cluster endpoint
    pub config_file: Option<PathBuf>,
    pub on_finish_action: Option<OnFinishAction>,
    /// Deprecated alias of `on_finish_action`
    pub is_delete_operator_pod: Option<bool>,
    /// Deprecated, has no effect
    pub regional: Option<bool>,
    /// Used when the pod manifest does not set one
    pub namespace: String,
    pub poll_interval: Duration,
    pub startup_timeout: Duration,
}

impl PodLaunchConfig {
    pub fn new(location: ClusterLocation, cluster_name: impl Into<String>) -> Self {
        Self {
            location,
            cluster_name: cluster_name.into(),
            use_internal_ip: false,
            gcp_conn_id: DEFAULT_GCP_CONN_ID.to_string(),
            config_file: None,
            on_finish_action: None,
            is_delete_operator_pod: None,
            regional: None,
            namespace: "default".to_string(),
            poll_interval: Duration::from_secs(2),
            startup_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_internal_ip(mut self, use_internal_ip: bool) -> Self {
        self.use_internal_ip = use_internal_ip;
        self
    }

    pub fn with_gcp_conn_id(mut self, conn_id: impl Into<String>) -> Self {
        self.gcp_conn_id = conn_id.into();
        self
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn with_on_finish_action(mut self, action: OnFinishAction) -> Self {
        self.on_finish_action = Some(action);
        self
    }

    pub fn with_is_delete_operator_pod(mut self, delete: bool) -> Self {
        self.is_delete_operator_pod = Some(delete);
        self
    }

    pub fn with_regional(mut self, regional: bool) -> Self {
        self.regional = Some(regional);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Settles legacy aliases into one finish action.
    fn resolve_finish_action(&self) -> LifecycleResult<OnFinishAction> {
        match (self.on_finish_action, self.is_delete_operator_pod) {
            (Some(_), Some(_)) => bail!(LifecycleError::Config {
                message: "Only one of on_finish_action and is_delete_operator_pod may be set"
                    .into(),
            }),
            (Some(action), None) => Ok(action),
            (None, Some(delete)) => {
                warn!(
                    "is_delete_operator_pod is deprecated, use on_finish_action instead"
                );
                Ok(if delete {
                    OnFinishAction::DeletePod
                } else {
                    OnFinishAction::KeepPod
                })
            }
            (None, None) => {
                warn!("No on_finish_action set, finished pods will be kept");
                Ok(OnFinishAction::KeepPod)
            }
        }
    }
}

/// Kwargs carried by a pod continuation.
#[derive(Debug, Deserialize)]
struct PodResumeParams {
    cluster_url: String,
    ssl_ca_cert: String,
    pod_name: String,
    namespace: String,
}

impl PodResumeParams {
    fn from_kwargs(kwargs: &ResumeKwargs) -> LifecycleResult<Self> {
        serde_json::from_value(serde_json::Value::Object(kwargs.clone())).change_context(
            LifecycleError::InvalidResume {
                message: "pod kwargs need cluster_url, ssl_ca_cert, pod_name and namespace".into(),
            },
        )
    }

    fn connection_info(&self) -> ClusterConnectionInfo {
        ClusterConnectionInfo::from_cluster_url(&self.cluster_url, self.ssl_ca_cert.clone())
    }

    fn pod(&self) -> PodRef {
        PodRef::new(self.pod_name.clone(), self.namespace.clone())
    }
}

/// Starts a pod on a cluster and waits for it, in the task or suspended.
///
/// The cluster endpoint and CA are looked up once per execution. On
/// suspension they travel in the continuation kwargs, so a resume reconnects
/// from those alone and never calls the control plane.
pub struct PodExecutionBridge {
    control_plane: Arc<dyn OperationControlPlane>,
    pod_sessions: Arc<dyn PodSessionFactory>,
    location: ClusterLocation,
    cluster_name: String,
    use_internal_ip: bool,
    on_finish_action: OnFinishAction,
    namespace: String,
    poll_interval: Duration,
    startup_timeout: Duration,
    poller: PollerConfig,
}

impl std::fmt::Debug for PodExecutionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodExecutionBridge")
            .field("location", &self.location)
            .field("cluster_name", &self.cluster_name)
            .field("use_internal_ip", &self.use_internal_ip)
            .field("on_finish_action", &self.on_finish_action)
            .finish_non_exhaustive()
    }
}

impl PodExecutionBridge {
    /// Validates the launch parameters.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::Config`] if a config file is given, the connection
    ///   id is empty, or both finish action parameters are set
    pub fn new(
        config: PodLaunchConfig,
        control_plane: Arc<dyn OperationControlPlane>,
        pod_sessions: Arc<dyn PodSessionFactory>,
        poller: PollerConfig,
    ) -> LifecycleResult<Self> {
        if let Some(path) = &config.config_file {
            bail!(LifecycleError::Config {
                message: format!(
                    "config_file ({}) is not supported, the cluster connection is built from the cluster endpoint",
                    path.display()
                ),
            });
        }
        if config.gcp_conn_id.is_empty() {
            bail!(LifecycleError::Config {
                message: "gcp_conn_id must not be empty".into(),
            });
        }
        let on_finish_action = config.resolve_finish_action()?;
        if config.regional.is_some() {
            warn!("regional is deprecated and has no effect, the location decides the scope");
        }

        Ok(Self {
            control_plane,
            pod_sessions,
            location: config.location,
            cluster_name: config.cluster_name,
            use_internal_ip: config.use_internal_ip,
            on_finish_action,
            namespace: config.namespace,
            poll_interval: Duration::from_secs(whole_poll_seconds(config.poll_interval)),
            startup_timeout: config.startup_timeout,
            poller,
        })
    }

    pub fn on_finish_action(&self) -> OnFinishAction {
        self.on_finish_action
    }

    /// Interval between pod status lookups, in whole seconds and at least one.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Looks up the endpoint and CA certificate of the target cluster.
    #[instrument(skip(self), fields(cluster = %self.cluster_name))]
    pub async fn fetch_cluster_info(&self) -> LifecycleResult<ClusterConnectionInfo> {
        let cluster = self
            .control_plane
            .get_cluster(&self.location, &self.cluster_name)
            .await
            .change_context(LifecycleError::ControlPlane {
                message: format!("failed to get cluster {}", self.cluster_name),
            })?;

        let endpoint = if self.use_internal_ip {
            match cluster.private_endpoint {
                Some(endpoint) if !endpoint.is_empty() => endpoint,
                _ => bail!(LifecycleError::Config {
                    message: format!(
                        "use_internal_ip is set but cluster {} has no private endpoint",
                        self.cluster_name
                    ),
                }),
            }
        } else {
            cluster.endpoint
        };

        let info = ClusterConnectionInfo::new(endpoint, cluster.ca_certificate);
        info!("Cluster endpoint: {}", info.cluster_url());
        Ok(info)
    }

    /// Create the pod and wait for it, or suspend on a pod watch.
    #[instrument(skip(self, pod), fields(cluster = %self.cluster_name))]
    pub async fn execute(&self, pod: Pod, mode: ExecutionMode) -> LifecycleResult<TaskOutcome<String>> {
        let info = self.fetch_cluster_info().await?;
        let api = self.connect(&info).await?;

        let mut pod = pod;
        pod.metadata
            .namespace
            .get_or_insert_with(|| self.namespace.clone());
        let pod_ref = api
            .create_pod(&pod)
            .await
            .change_context(LifecycleError::PodSession {
                message: "failed to create pod".into(),
            })?;
        info!(pod = %pod_ref, "Pod created");

        match mode {
            ExecutionMode::Synchronous { timeout } => {
                let probe =
                    PodProbe::new(api.clone(), pod_ref.clone(), Utc::now(), self.startup_timeout);
                let poller = OperationPoller::new(probe, self.poll_interval, self.poller.clone());
                let event = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, poller.run()).await {
                        Ok(event) => event,
                        Err(_) => {
                            self.cleanup(api.as_ref(), &pod_ref, false).await;
                            bail!(LifecycleError::Timeout {
                                seconds: limit.as_secs(),
                            });
                        }
                    },
                    None => poller.run().await,
                };
                self.finish(api.as_ref(), &pod_ref, &event)
                    .await
                    .map(TaskOutcome::Complete)
            }
            ExecutionMode::Deferred => {
                let watch = PodWatch {
                    pod_name: pod_ref.name.clone(),
                    namespace: pod_ref.namespace.clone(),
                    cluster_url: info.cluster_url(),
                    ca_certificate: info.ca_certificate.clone(),
                    poll_interval_seconds: self.poll_interval.as_secs(),
                    startup_timeout_seconds: self.startup_timeout.as_secs(),
                    started_at: Utc::now(),
                    on_finish_action: self.on_finish_action,
                };
                info!(pod = %pod_ref, "Suspending until the pod finishes");
                let continuation = Continuation::new(
                    TriggerDescriptor::PodWatch(watch),
                    ResumeEntrypoint::PodFinished.as_str(),
                )
                .with_kwarg("cluster_url", info.cluster_url())
                .with_kwarg("ssl_ca_cert", info.ca_certificate)
                .with_kwarg("pod_name", pod_ref.name)
                .with_kwarg("namespace", pod_ref.namespace);
                Ok(TaskOutcome::Deferred(continuation))
            }
        }
    }

    /// Resume after the pod watch fired.
    ///
    /// The session is rebuilt from the kwargs only.
    #[instrument(skip(self, event, kwargs), fields(status = %event.status))]
    pub async fn execute_complete(
        &self,
        event: &CompletionEvent,
        kwargs: &ResumeKwargs,
    ) -> LifecycleResult<String> {
        let params = PodResumeParams::from_kwargs(kwargs)?;
        let api = self.connect(&params.connection_info()).await?;
        self.finish(api.as_ref(), &params.pod(), event).await
    }

    /// Best-effort cleanup for a task cancelled while suspended.
    #[instrument(skip(self, kwargs))]
    pub async fn on_cancel(&self, kwargs: &ResumeKwargs) -> LifecycleResult<()> {
        let params = PodResumeParams::from_kwargs(kwargs)?;
        let pod = params.pod();
        if !self.on_finish_action.deletes(false) {
            info!(pod = %pod, "Cancelled, keeping pod per {:?}", self.on_finish_action);
            return Ok(());
        }

        let api = self.connect(&params.connection_info()).await?;
        api.delete_pod(&pod)
            .await
            .change_context(LifecycleError::PodSession {
                message: format!("failed to delete pod {pod}"),
            })?;
        info!(pod = %pod, "Cancelled, pod deleted");
        Ok(())
    }

    async fn connect(&self, info: &ClusterConnectionInfo) -> LifecycleResult<Arc<dyn PodApi>> {
        self.pod_sessions
            .connect(info)
            .await
            .change_context(LifecycleError::PodSession {
                message: format!("failed to open pod session to {}", info.cluster_url()),
            })
    }

    async fn finish(
        &self,
        api: &dyn PodApi,
        pod: &PodRef,
        event: &CompletionEvent,
    ) -> LifecycleResult<String> {
        self.cleanup(api, pod, !event.is_failure()).await;
        if event.is_failure() {
            bail!(LifecycleError::from_failed_event(event));
        }
        info!("{}", event.message);
        Ok(pod.name.clone())
    }

    async fn cleanup(&self, api: &dyn PodApi, pod: &PodRef, succeeded: bool) {
        if !self.on_finish_action.deletes(succeeded) {
            return;
        }
        match api.delete_pod(pod).await {
            Ok(()) => info!(pod = %pod, "Pod deleted"),
            Err(report) => warn!(pod = %pod, "Failed to delete pod: {report:?}"),
        }
    }
}
