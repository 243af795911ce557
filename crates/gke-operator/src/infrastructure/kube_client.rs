use api_types::ClusterConnectionInfo;
use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;

use crate::domain::pod::PodSessionError;

const CONTEXT_NAME: &str = "gke-operator";

/// Builds an in-memory kubeconfig for one cluster endpoint and bearer token.
fn kubeconfig_for(
    info: &ClusterConnectionInfo,
    access_token: &str,
) -> Result<Kubeconfig, Report<PodSessionError>> {
    let document = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": CONTEXT_NAME,
            "cluster": {
                "server": info.cluster_url(),
                "certificate-authority-data": info.ca_certificate,
            },
        }],
        "users": [{
            "name": CONTEXT_NAME,
            "user": { "token": access_token },
        }],
        "contexts": [{
            "name": CONTEXT_NAME,
            "context": { "cluster": CONTEXT_NAME, "user": CONTEXT_NAME },
        }],
        "current-context": CONTEXT_NAME,
    });

    serde_json::from_value(document).change_context(PodSessionError::Connect {
        message: "Failed to build kubeconfig for cluster endpoint".to_string(),
    })
}

/// Creates a client for the cluster described by `info`.
///
/// Nothing is read from disk; the endpoint and CA always come from the
/// control plane lookup of the current execution.
pub async fn init_kube_client(
    info: &ClusterConnectionInfo,
    access_token: &str,
) -> Result<Client, Report<PodSessionError>> {
    let kubeconfig = kubeconfig_for(info, access_token)?;

    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context(PodSessionError::Connect {
            message: format!(
                "Failed to create config for cluster {}",
                info.cluster_url()
            ),
        })?;

    let client = Client::try_from(config).change_context(PodSessionError::Connect {
        message: "Failed to create Kubernetes client for cluster endpoint".to_string(),
    })?;
    Ok(client)
}
