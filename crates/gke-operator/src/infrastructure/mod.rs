pub mod gke_client;
pub mod kube_client;
pub mod pod_session;
