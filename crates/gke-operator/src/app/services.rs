use std::sync::Arc;

use anyhow::Result;

use crate::config::GlobalArgs;
use crate::domain::control_plane::OperationControlPlane;
use crate::domain::pod::PodSessionFactory;
use crate::infrastructure::gke_client::HttpControlPlane;
use crate::infrastructure::gke_client::HttpControlPlaneConfig;
use crate::infrastructure::pod_session::KubeSessionFactory;

/// Remote collaborators shared by every command.
#[derive(Clone)]
pub struct ApplicationServices {
    pub control_plane: Arc<dyn OperationControlPlane>,
    pub pod_sessions: Arc<dyn PodSessionFactory>,
}

impl ApplicationServices {
    pub fn new(
        control_plane: Arc<dyn OperationControlPlane>,
        pod_sessions: Arc<dyn PodSessionFactory>,
    ) -> Self {
        Self {
            control_plane,
            pod_sessions,
        }
    }

    /// Services talking to the real control plane and clusters.
    pub fn from_args(global: &GlobalArgs) -> Result<Self> {
        let control_plane = HttpControlPlane::new(HttpControlPlaneConfig::new(
            global.endpoint.clone(),
            global.access_token.clone(),
        ))
        .map_err(|e| anyhow::anyhow!("Failed to initialize control plane client: {e:?}"))?;

        Ok(Self::new(
            Arc::new(control_plane),
            Arc::new(KubeSessionFactory::new(global.access_token.clone())),
        ))
    }
}
