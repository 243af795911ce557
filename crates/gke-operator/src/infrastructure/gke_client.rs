//! Control plane adapter for the GKE v1 REST API.

use std::time::Duration;

use api_types::ClusterLocation;
use api_types::OperationHandle;
use api_types::OperationState;
use api_types::OperationStatus;
use async_trait::async_trait;
use error_stack::bail;
use error_stack::Report;
use error_stack::ResultExt;
use reqwest::Client;
use reqwest::RequestBuilder;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use url::Url;

use crate::domain::control_plane::ClusterEndpoints;
use crate::domain::control_plane::ControlPlaneError;
use crate::domain::control_plane::ControlPlaneResult;
use crate::domain::control_plane::OperationControlPlane;
use crate::domain::request::ClusterSpec;

pub const DEFAULT_ENDPOINT: &str = "https://container.googleapis.com/";

/// Configuration for [`HttpControlPlane`].
#[derive(Debug, Clone)]
pub struct HttpControlPlaneConfig {
    pub endpoint: Url,
    /// OAuth bearer token sent with every request
    pub access_token: String,
    pub request_timeout: Duration,
}

impl HttpControlPlaneConfig {
    pub fn new(endpoint: Url, access_token: impl Into<String>) -> Self {
        Self {
            endpoint,
            access_token: access_token.into(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResource {
    name: String,
    #[serde(default)]
    self_link: String,
    #[serde(default)]
    target_link: String,
    #[serde(default)]
    status: Option<OperationState>,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    error: Option<StatusResource>,
}

#[derive(Debug, Deserialize)]
struct StatusResource {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

impl From<OperationResource> for OperationHandle {
    fn from(op: OperationResource) -> Self {
        Self {
            name: op.name,
            self_link: op.self_link,
            target_link: op.target_link,
        }
    }
}

impl From<OperationResource> for OperationStatus {
    fn from(op: OperationResource) -> Self {
        let mut status = OperationStatus::new(
            op.name,
            op.status.unwrap_or(OperationState::Unspecified),
        );
        match op.error {
            Some(error) if error.code != 0 => {
                status = status.with_error_code(error.code);
                let message = if error.message.is_empty() {
                    op.status_message.unwrap_or_default()
                } else {
                    error.message
                };
                if !message.is_empty() {
                    status = status.with_message(message);
                }
            }
            _ => {
                if let Some(message) = op.status_message.filter(|m| !m.is_empty()) {
                    status = status.with_message(message);
                }
            }
        }
        status
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterResource {
    name: String,
    #[serde(default)]
    self_link: String,
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    private_cluster_config: Option<PrivateClusterConfig>,
    #[serde(default)]
    master_auth: Option<MasterAuth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrivateClusterConfig {
    #[serde(default)]
    private_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterAuth {
    #[serde(default)]
    cluster_ca_certificate: Option<String>,
}

impl From<ClusterResource> for ClusterEndpoints {
    fn from(cluster: ClusterResource) -> Self {
        Self {
            name: cluster.name,
            self_link: cluster.self_link,
            endpoint: cluster.endpoint,
            private_endpoint: cluster
                .private_cluster_config
                .and_then(|c| c.private_endpoint)
                .filter(|e| !e.is_empty()),
            ca_certificate: cluster
                .master_auth
                .and_then(|a| a.cluster_ca_certificate)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateClusterBody<'a> {
    parent: String,
    cluster: &'a ClusterSpec,
}

/// Maps a non-success HTTP status onto a control plane error.
fn classify_status(status: StatusCode, resource: &str, body: String) -> ControlPlaneError {
    match status {
        StatusCode::CONFLICT => ControlPlaneError::AlreadyExists {
            resource: resource.to_string(),
        },
        StatusCode::NOT_FOUND => ControlPlaneError::NotFound {
            resource: resource.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => ControlPlaneError::Unavailable {
            message: format!("{status}: {body}"),
        },
        s if s.is_server_error() => ControlPlaneError::Unavailable {
            message: format!("{status}: {body}"),
        },
        s => ControlPlaneError::Rejected {
            status: s.as_u16(),
            message: body,
        },
    }
}

/// [`OperationControlPlane`] over HTTPS.
pub struct HttpControlPlane {
    http: Client,
    endpoint: Url,
    access_token: String,
}

impl HttpControlPlane {
    pub fn new(config: HttpControlPlaneConfig) -> ControlPlaneResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .change_context(ControlPlaneError::InvalidRequest {
                message: "Failed to create HTTP client".into(),
            })?;

        info!(endpoint = %config.endpoint, "GKE control plane client created");

        Ok(Self {
            http,
            endpoint: config.endpoint,
            access_token: config.access_token,
        })
    }

    /// `v1/projects/{p}/locations/{l}/{resource...}` under the endpoint.
    ///
    /// Every name becomes exactly one escaped path segment.
    fn url(&self, location: &ClusterLocation, resource: &[&str]) -> ControlPlaneResult<Url> {
        let scope = [
            "v1",
            "projects",
            location.project_id.as_str(),
            "locations",
            location.location.as_str(),
        ];
        if let Some(bad) = scope[2..]
            .iter()
            .chain(resource)
            .find(|segment| matches!(**segment, "" | "." | ".."))
        {
            bail!(ControlPlaneError::InvalidRequest {
                message: format!("invalid resource name {bad:?} under {}", location.parent()),
            });
        }

        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| {
                Report::new(ControlPlaneError::InvalidRequest {
                    message: format!("endpoint {} cannot carry a path", self.endpoint),
                })
            })?
            .pop_if_empty()
            .extend(scope)
            .extend(resource);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> ControlPlaneResult<T> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .change_context(ControlPlaneError::Unavailable {
                message: format!("request for {resource} failed"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, resource, "Control plane returned an error");
            bail!(classify_status(status, resource, body));
        }

        response
            .json::<T>()
            .await
            .change_context(ControlPlaneError::Decode {
                message: format!("unexpected response body for {resource}"),
            })
    }
}

#[async_trait]
impl OperationControlPlane for HttpControlPlane {
    #[instrument(skip(self, spec), fields(cluster = %spec.name))]
    async fn submit_create(
        &self,
        location: &ClusterLocation,
        spec: &ClusterSpec,
        idempotency_key: &str,
    ) -> ControlPlaneResult<OperationHandle> {
        let url = self.url(location, &["clusters"])?;
        let body = CreateClusterBody {
            parent: location.parent(),
            cluster: spec,
        };
        let op: OperationResource = self
            .send(self.http.post(url).json(&body), &spec.name)
            .await?;
        Ok(op.into())
    }

    #[instrument(skip(self))]
    async fn submit_delete(
        &self,
        location: &ClusterLocation,
        cluster_name: &str,
    ) -> ControlPlaneResult<Option<OperationHandle>> {
        let url = self.url(location, &["clusters", cluster_name])?;
        match self
            .send::<OperationResource>(self.http.delete(url), cluster_name)
            .await
        {
            Ok(op) => Ok(Some(op.into())),
            Err(report) if matches!(report.current_context(), ControlPlaneError::NotFound { .. }) => {
                Ok(None)
            }
            Err(report) => Err(report),
        }
    }

    async fn get_operation_status(
        &self,
        location: &ClusterLocation,
        operation_name: &str,
    ) -> ControlPlaneResult<OperationStatus> {
        let url = self.url(location, &["operations", operation_name])?;
        let op: OperationResource = self.send(self.http.get(url), operation_name).await?;
        Ok(op.into())
    }

    async fn get_operation(
        &self,
        location: &ClusterLocation,
        operation_name: &str,
    ) -> ControlPlaneResult<OperationHandle> {
        let url = self.url(location, &["operations", operation_name])?;
        let op: OperationResource = self.send(self.http.get(url), operation_name).await?;
        Ok(op.into())
    }

    async fn get_cluster(
        &self,
        location: &ClusterLocation,
        cluster_name: &str,
    ) -> ControlPlaneResult<ClusterEndpoints> {
        let url = self.url(location, &["clusters", cluster_name])?;
        let cluster: ClusterResource = self.send(self.http.get(url), cluster_name).await?;
        Ok(cluster.into())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn status_codes_map_to_control_plane_errors() {
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, "c1", String::new()),
            ControlPlaneError::AlreadyExists { resource } if resource == "c1"
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "c1", String::new()),
            ControlPlaneError::NotFound { .. }
        ));

        let throttled = classify_status(StatusCode::TOO_MANY_REQUESTS, "op", "slow down".into());
        assert!(throttled.is_transient());
        let outage = classify_status(StatusCode::BAD_GATEWAY, "op", String::new());
        assert!(outage.is_transient());

        let rejected = classify_status(StatusCode::FORBIDDEN, "op", "denied".into());
        assert_eq!(
            rejected,
            ControlPlaneError::Rejected {
                status: 403,
                message: "denied".into(),
            }
        );
        assert!(!rejected.is_transient());
    }

    #[test]
    fn operation_with_error_becomes_embedded_failure() {
        let op: OperationResource = serde_json::from_value(json!({
            "name": "operation-17",
            "status": "DONE",
            "selfLink": "https://container.googleapis.com/v1/projects/p/locations/l/operations/operation-17",
            "targetLink": "https://container.googleapis.com/v1/projects/p/locations/l/clusters/c1",
            "error": {"code": 8, "message": "Insufficient regional quota"}
        }))
        .expect("should parse operation");

        let status = OperationStatus::from(op);
        assert_eq!(status.state, OperationState::Done);
        assert_eq!(
            status.embedded_failure().as_deref(),
            Some("Insufficient regional quota")
        );
    }

    #[test]
    fn operation_without_status_is_unspecified() {
        let op: OperationResource =
            serde_json::from_value(json!({"name": "operation-1"})).expect("should parse operation");
        let status = OperationStatus::from(op);
        assert_eq!(status.state, OperationState::Unspecified);
        assert_eq!(status.embedded_failure(), None);
    }

    #[test]
    fn cluster_resource_exposes_endpoints() {
        let cluster: ClusterResource = serde_json::from_value(json!({
            "name": "c1",
            "selfLink": "https://container.googleapis.com/v1/projects/p/locations/l/clusters/c1",
            "endpoint": "34.1.2.3",
            "privateClusterConfig": {"privateEndpoint": "10.0.0.2"},
            "masterAuth": {"clusterCaCertificate": "Y2VydA=="}
        }))
        .expect("should parse cluster");

        let endpoints = ClusterEndpoints::from(cluster);
        assert_eq!(endpoints.endpoint, "34.1.2.3");
        assert_eq!(endpoints.private_endpoint.as_deref(), Some("10.0.0.2"));
        assert_eq!(endpoints.ca_certificate, "Y2VydA==");
    }

    #[test]
    fn urls_are_scoped_to_location() {
        let endpoint = Url::parse(DEFAULT_ENDPOINT).expect("valid endpoint");
        let client = HttpControlPlane::new(HttpControlPlaneConfig::new(endpoint, "token"))
            .expect("should build client");
        let url = client
            .url(&ClusterLocation::new("p", "us-central1"), &["operations", "op-1"])
            .expect("should build url");
        assert_eq!(
            url.as_str(),
            "https://container.googleapis.com/v1/projects/p/locations/us-central1/operations/op-1"
        );
    }

    #[test]
    fn names_cannot_escape_their_path_segment() {
        let endpoint = Url::parse("https://gke.example.com/api/").expect("valid endpoint");
        let client = HttpControlPlane::new(HttpControlPlaneConfig::new(endpoint, "token"))
            .expect("should build client");
        let location = ClusterLocation::new("p", "us-central1");

        let url = client
            .url(&location, &["clusters", "a/b?c#d"])
            .expect("should build url");
        assert_eq!(
            url.as_str(),
            "https://gke.example.com/api/v1/projects/p/locations/us-central1/clusters/a%2Fb%3Fc%23d"
        );

        for name in ["..", ".", ""] {
            let err = client
                .url(&location, &["operations", name])
                .expect_err("dot segments should be rejected");
            assert!(matches!(
                err.current_context(),
                ControlPlaneError::InvalidRequest { .. }
            ));
        }
    }
}
