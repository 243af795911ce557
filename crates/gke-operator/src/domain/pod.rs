//! Pod session contract and the pod watch trigger.

use core::error::Error;
use std::sync::Arc;
use std::time::Duration;

use api_types::ClusterConnectionInfo;
use api_types::CompletionEvent;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use serde::Serialize;

use crate::domain::poller::ProbeError;
use crate::domain::poller::ProbeOutcome;
use crate::domain::poller::StatusProbe;

/// Errors reported by a pod session.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum PodSessionError {
    #[display("Failed to connect to cluster: {message}")]
    Connect { message: String },
    #[display("Pod not found: {pod}")]
    NotFound { pod: String },
    /// The API server could not be reached; safe to retry
    #[display("Cluster API unavailable: {message}")]
    Unavailable { message: String },
    #[display("Pod API request failed: {message}")]
    Api { message: String },
}

impl Error for PodSessionError {}

pub type PodSessionResult<T> = Result<T, Report<PodSessionError>>;

/// Coarse pod lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parses the `status.phase` string reported by the API server.
    pub fn from_status(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// Identity of a created pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[display("{namespace}/{name}")]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
}

impl PodRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodStatusSnapshot {
    pub phase: PodPhase,
    /// Reason or message reported with the phase, if any
    pub message: Option<String>,
}

impl PodStatusSnapshot {
    pub fn new(phase: PodPhase) -> Self {
        Self {
            phase,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Pod operations available over one live cluster connection.
#[async_trait]
pub trait PodApi: Send + Sync {
    async fn create_pod(&self, pod: &Pod) -> PodSessionResult<PodRef>;

    async fn pod_status(&self, pod: &PodRef) -> PodSessionResult<PodStatusSnapshot>;

    /// Delete a pod. A pod that is already gone counts as deleted.
    async fn delete_pod(&self, pod: &PodRef) -> PodSessionResult<()>;
}

/// Opens pod sessions against a cluster endpoint.
///
/// A session is never cached: every execution and every resume connects anew.
#[async_trait]
pub trait PodSessionFactory: Send + Sync {
    async fn connect(&self, info: &ClusterConnectionInfo) -> PodSessionResult<Arc<dyn PodApi>>;
}

/// What to do with the pod once it finished.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum OnFinishAction {
    #[default]
    KeepPod,
    DeletePod,
    DeleteSucceededPod,
}

impl OnFinishAction {
    /// Whether a pod that finished with `succeeded` should be removed.
    pub fn deletes(self, succeeded: bool) -> bool {
        match self {
            Self::KeepPod => false,
            Self::DeletePod => true,
            Self::DeleteSucceededPod => succeeded,
        }
    }
}

/// Serializable pod watch, rebuilt into a [`PodProbe`] by the trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodWatch {
    pub pod_name: String,
    pub namespace: String,
    pub cluster_url: String,
    pub ca_certificate: String,
    pub poll_interval_seconds: u64,
    pub startup_timeout_seconds: u64,
    pub started_at: DateTime<Utc>,
    pub on_finish_action: OnFinishAction,
}

impl PodWatch {
    pub fn pod(&self) -> PodRef {
        PodRef::new(self.pod_name.clone(), self.namespace.clone())
    }

    pub fn connection_info(&self) -> ClusterConnectionInfo {
        ClusterConnectionInfo::from_cluster_url(&self.cluster_url, self.ca_certificate.clone())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }
}

/// Watches one pod until it succeeds, fails or never starts.
pub struct PodProbe {
    api: Arc<dyn PodApi>,
    pod: PodRef,
    started_at: DateTime<Utc>,
    startup_timeout: Duration,
}

impl PodProbe {
    pub fn new(
        api: Arc<dyn PodApi>,
        pod: PodRef,
        started_at: DateTime<Utc>,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            api,
            pod,
            started_at,
            startup_timeout,
        }
    }

    fn startup_expired(&self) -> bool {
        (Utc::now() - self.started_at)
            .to_std()
            .is_ok_and(|elapsed| elapsed > self.startup_timeout)
    }
}

#[async_trait]
impl StatusProbe for PodProbe {
    fn subject(&self) -> String {
        format!("pod {}", self.pod)
    }

    async fn probe(&self) -> Result<ProbeOutcome, Report<ProbeError>> {
        let snapshot = self.api.pod_status(&self.pod).await.map_err(|report| {
            let message = report.current_context().to_string();
            let context = match report.current_context() {
                PodSessionError::Unavailable { .. } => ProbeError::Transient { message },
                _ => ProbeError::Fatal { message },
            };
            report.change_context(context)
        })?;

        let outcome = match snapshot.phase {
            PodPhase::Succeeded => ProbeOutcome::Terminal(CompletionEvent::success(format!(
                "Pod {} has completed successfully",
                self.pod.name
            ))),
            PodPhase::Failed => {
                let detail = snapshot.message.unwrap_or_else(|| "no reason reported".into());
                ProbeOutcome::Terminal(CompletionEvent::failed(format!(
                    "Pod {} failed: {detail}",
                    self.pod.name
                )))
            }
            PodPhase::Pending if self.startup_expired() => {
                ProbeOutcome::Terminal(CompletionEvent::failed("Pod took too long to start"))
            }
            phase => ProbeOutcome::Pending {
                detail: format!("pod {} is {phase}", self.pod),
            },
        };
        Ok(outcome)
    }
}
