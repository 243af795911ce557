//! Contract of the remote cluster control plane.

use core::error::Error;

use api_types::ClusterLocation;
use api_types::OperationHandle;
use api_types::OperationStatus;
use async_trait::async_trait;
use error_stack::Report;
use serde::Deserialize;
use serde::Serialize;

use crate::domain::request::ClusterSpec;

/// Errors reported by a control plane adapter.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ControlPlaneError {
    #[display("Resource already exists: {resource}")]
    AlreadyExists { resource: String },
    #[display("Resource not found: {resource}")]
    NotFound { resource: String },
    /// Network failure, throttling or a server side outage; safe to retry
    #[display("Control plane unavailable: {message}")]
    Unavailable { message: String },
    #[display("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[display("Failed to decode control plane response: {message}")]
    Decode { message: String },
    /// The request could not be built, e.g. a name that does not fit in a URL
    #[display("Invalid control plane request: {message}")]
    InvalidRequest { message: String },
}

impl ControlPlaneError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl Error for ControlPlaneError {}

pub type ControlPlaneResult<T> = Result<T, Report<ControlPlaneError>>;

/// The connection relevant parts of a cluster record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEndpoints {
    pub name: String,
    pub self_link: String,
    /// Public endpoint host
    pub endpoint: String,
    /// Internal endpoint host, only set for private clusters
    pub private_endpoint: Option<String>,
    /// Base64 encoded PEM bundle
    pub ca_certificate: String,
}

/// Remote capability that runs long operations against clusters.
///
/// Adapters translate the remote API's responses into [`ControlPlaneError`]
/// variants; callers only ever branch on those.
#[async_trait]
pub trait OperationControlPlane: Send + Sync {
    /// Submit a cluster creation.
    ///
    /// # Errors
    ///
    /// - [`ControlPlaneError::AlreadyExists`] if a cluster with this name exists
    async fn submit_create(
        &self,
        location: &ClusterLocation,
        spec: &ClusterSpec,
        idempotency_key: &str,
    ) -> ControlPlaneResult<OperationHandle>;

    /// Submit a cluster deletion. `None` means the cluster is already gone.
    async fn submit_delete(
        &self,
        location: &ClusterLocation,
        cluster_name: &str,
    ) -> ControlPlaneResult<Option<OperationHandle>>;

    async fn get_operation_status(
        &self,
        location: &ClusterLocation,
        operation_name: &str,
    ) -> ControlPlaneResult<OperationStatus>;

    /// Fetch the operation record, used to resolve its links once it finished.
    async fn get_operation(
        &self,
        location: &ClusterLocation,
        operation_name: &str,
    ) -> ControlPlaneResult<OperationHandle>;

    async fn get_cluster(
        &self,
        location: &ClusterLocation,
        cluster_name: &str,
    ) -> ControlPlaneResult<ClusterEndpoints>;
}
