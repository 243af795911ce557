//! Deferred polling of managed cluster operations.
//!
//! Cluster create/delete requests and pod executions are submitted once and
//! then either polled in the calling task or suspended as a serializable
//! continuation that a trigger watches. See [`domain::coordinator`] and
//! [`domain::bridge`] for the two entrypoints.

pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export main modules
pub use domain::bridge;
pub use domain::control_plane;
pub use domain::coordinator;
pub use domain::error;
#[cfg(any(test, feature = "test-util"))]
pub use domain::mock;
pub use domain::pod;
pub use domain::poller;
pub use domain::request;
pub use domain::triggers;
pub use infrastructure::gke_client;
pub use infrastructure::kube_client;
pub use infrastructure::pod_session;
