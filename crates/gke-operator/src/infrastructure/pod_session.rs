//! Pod sessions backed by a live Kubernetes client.

use std::sync::Arc;

use api_types::ClusterConnectionInfo;
use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DeleteParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use tracing::debug;
use tracing::info;

use crate::domain::pod::PodApi;
use crate::domain::pod::PodPhase;
use crate::domain::pod::PodRef;
use crate::domain::pod::PodSessionError;
use crate::domain::pod::PodSessionFactory;
use crate::domain::pod::PodSessionResult;
use crate::domain::pod::PodStatusSnapshot;
use crate::infrastructure::kube_client::init_kube_client;

fn classify(err: kube::Error, pod: &str) -> Report<PodSessionError> {
    let context = match &err {
        kube::Error::Api(ae) if ae.code == 404 => PodSessionError::NotFound {
            pod: pod.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 429 || ae.code >= 500 => {
            PodSessionError::Unavailable {
                message: ae.message.clone(),
            }
        }
        kube::Error::Api(ae) => PodSessionError::Api {
            message: ae.message.clone(),
        },
        other => PodSessionError::Unavailable {
            message: other.to_string(),
        },
    };
    Report::new(err).change_context(context)
}

/// One live connection to a cluster's API server.
pub struct PodExecutionSession {
    client: Client,
}

impl PodExecutionSession {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl PodApi for PodExecutionSession {
    async fn create_pod(&self, pod: &Pod) -> PodSessionResult<PodRef> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let requested = pod.metadata.name.clone().unwrap_or_default();

        let created = self
            .pods(namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| classify(e, &requested))?;

        let name = created.metadata.name.unwrap_or(requested);
        info!(pod = %name, namespace, "Pod submitted");
        Ok(PodRef::new(name, namespace))
    }

    async fn pod_status(&self, pod: &PodRef) -> PodSessionResult<PodStatusSnapshot> {
        let current = self
            .pods(&pod.namespace)
            .get(&pod.name)
            .await
            .map_err(|e| classify(e, &pod.name))?;

        let status = current.status.unwrap_or_default();
        let phase = PodPhase::from_status(status.phase.as_deref());
        let snapshot = PodStatusSnapshot::new(phase);
        Ok(match status.message.or(status.reason) {
            Some(message) => snapshot.with_message(message),
            None => snapshot,
        })
    }

    async fn delete_pod(&self, pod: &PodRef) -> PodSessionResult<()> {
        match self
            .pods(&pod.namespace)
            .delete(&pod.name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(pod = %pod, "Pod already gone");
                Ok(())
            }
            Err(e) => Err(classify(e, &pod.name)),
        }
    }
}

/// Connects to cluster endpoints with a fixed bearer token.
pub struct KubeSessionFactory {
    access_token: String,
}

impl KubeSessionFactory {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }
}

#[async_trait]
impl PodSessionFactory for KubeSessionFactory {
    async fn connect(&self, info: &ClusterConnectionInfo) -> PodSessionResult<Arc<dyn PodApi>> {
        let client = init_kube_client(info, &self.access_token).await?;
        let session: Arc<dyn PodApi> = Arc::new(PodExecutionSession::new(client));
        Ok(session)
    }
}
