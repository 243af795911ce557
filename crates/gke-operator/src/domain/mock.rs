//! In-memory control plane and pod backend for tests.
//!
//! Both record every call so tests can assert on what was (and was not)
//! contacted. Scripted responses are consumed in order; the last one repeats.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use api_types::ClusterConnectionInfo;
use api_types::ClusterLocation;
use api_types::OperationHandle;
use api_types::OperationState;
use api_types::OperationStatus;
use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use tokio::time::Instant;

use crate::domain::control_plane::ClusterEndpoints;
use crate::domain::control_plane::ControlPlaneError;
use crate::domain::control_plane::ControlPlaneResult;
use crate::domain::control_plane::OperationControlPlane;
use crate::domain::pod::PodApi;
use crate::domain::pod::PodPhase;
use crate::domain::pod::PodRef;
use crate::domain::pod::PodSessionError;
use crate::domain::pod::PodSessionFactory;
use crate::domain::pod::PodSessionResult;
use crate::domain::pod::PodStatusSnapshot;
use crate::domain::request::ClusterSpec;

const API_BASE: &str = "https://container.googleapis.com/v1";

fn next_scripted<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut queue = queue.lock().unwrap();
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// Scripted [`OperationControlPlane`].
pub struct MockControlPlane {
    statuses: Mutex<VecDeque<Result<OperationState, ControlPlaneError>>>,
    create_error: Mutex<Option<ControlPlaneError>>,
    delete_absent: Mutex<bool>,
    embedded_failure: Mutex<Option<String>>,
    clusters: Mutex<HashMap<String, ClusterEndpoints>>,
    operations: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
    poll_instants: Mutex<Vec<Instant>>,
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl MockControlPlane {
    /// Operations finish on the first status lookup unless scripted otherwise.
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(VecDeque::from([Ok(OperationState::Done)])),
            create_error: Mutex::new(None),
            delete_absent: Mutex::new(false),
            embedded_failure: Mutex::new(None),
            clusters: Mutex::new(HashMap::new()),
            operations: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            poll_instants: Mutex::new(Vec::new()),
        }
    }

    pub fn with_states(self, states: impl IntoIterator<Item = OperationState>) -> Self {
        *self.statuses.lock().unwrap() = states.into_iter().map(Ok).collect();
        self
    }

    /// Script lookups that may fail.
    pub fn with_status_results(
        self,
        results: impl IntoIterator<Item = Result<OperationState, ControlPlaneError>>,
    ) -> Self {
        *self.statuses.lock().unwrap() = results.into_iter().collect();
        self
    }

    pub fn with_create_error(self, error: ControlPlaneError) -> Self {
        *self.create_error.lock().unwrap() = Some(error);
        self
    }

    /// Report deletes as "already gone".
    pub fn with_absent_cluster(self) -> Self {
        *self.delete_absent.lock().unwrap() = true;
        self
    }

    /// `Done` statuses carry this failure.
    pub fn with_embedded_failure(self, message: impl Into<String>) -> Self {
        *self.embedded_failure.lock().unwrap() = Some(message.into());
        self
    }

    pub fn with_cluster(self, cluster: ClusterEndpoints) -> Self {
        self.clusters
            .lock()
            .unwrap()
            .insert(cluster.name.clone(), cluster);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == method).count()
    }

    /// When each status lookup happened, on the tokio clock.
    pub fn poll_instants(&self) -> Vec<Instant> {
        self.poll_instants.lock().unwrap().clone()
    }

    fn record(&self, method: &str) {
        self.calls.lock().unwrap().push(method.to_string());
    }

    fn handle(location: &ClusterLocation, operation: &str, cluster: &str) -> OperationHandle {
        let parent = location.parent();
        OperationHandle {
            name: operation.to_string(),
            self_link: format!("{API_BASE}/{parent}/operations/{operation}"),
            target_link: format!("{API_BASE}/{parent}/clusters/{cluster}"),
        }
    }

    fn start_operation(&self, location: &ClusterLocation, cluster: &str) -> OperationHandle {
        let mut operations = self.operations.lock().unwrap();
        let name = format!("operation-{}", operations.len() + 1);
        operations.insert(name.clone(), cluster.to_string());
        Self::handle(location, &name, cluster)
    }
}

#[async_trait]
impl OperationControlPlane for MockControlPlane {
    async fn submit_create(
        &self,
        location: &ClusterLocation,
        spec: &ClusterSpec,
        _idempotency_key: &str,
    ) -> ControlPlaneResult<OperationHandle> {
        self.record("submit_create");
        if let Some(error) = self.create_error.lock().unwrap().clone() {
            return Err(Report::new(error));
        }
        Ok(self.start_operation(location, &spec.name))
    }

    async fn submit_delete(
        &self,
        location: &ClusterLocation,
        cluster_name: &str,
    ) -> ControlPlaneResult<Option<OperationHandle>> {
        self.record("submit_delete");
        if *self.delete_absent.lock().unwrap() {
            return Ok(None);
        }
        Ok(Some(self.start_operation(location, cluster_name)))
    }

    async fn get_operation_status(
        &self,
        _location: &ClusterLocation,
        operation_name: &str,
    ) -> ControlPlaneResult<OperationStatus> {
        self.record("get_operation_status");
        self.poll_instants.lock().unwrap().push(Instant::now());

        let scripted = next_scripted(&self.statuses).unwrap_or(Ok(OperationState::Done));
        let state = scripted.map_err(Report::new)?;
        let mut status = OperationStatus::new(operation_name, state);
        if state == OperationState::Done {
            if let Some(message) = self.embedded_failure.lock().unwrap().clone() {
                status = status.with_error_code(9).with_message(message);
            }
        }
        Ok(status)
    }

    async fn get_operation(
        &self,
        location: &ClusterLocation,
        operation_name: &str,
    ) -> ControlPlaneResult<OperationHandle> {
        self.record("get_operation");
        let cluster = self
            .operations
            .lock()
            .unwrap()
            .get(operation_name)
            .cloned()
            .unwrap_or_default();
        Ok(Self::handle(location, operation_name, &cluster))
    }

    async fn get_cluster(
        &self,
        _location: &ClusterLocation,
        cluster_name: &str,
    ) -> ControlPlaneResult<ClusterEndpoints> {
        self.record("get_cluster");
        self.clusters
            .lock()
            .unwrap()
            .get(cluster_name)
            .cloned()
            .ok_or_else(|| {
                Report::new(ControlPlaneError::NotFound {
                    resource: cluster_name.to_string(),
                })
            })
    }
}

/// Scripted pod backend, shared by every session it hands out.
pub struct MockPodApi {
    phases: Mutex<VecDeque<Result<PodPhase, PodSessionError>>>,
    created: Mutex<Vec<PodRef>>,
    deleted: Mutex<Vec<PodRef>>,
    status_calls: Mutex<usize>,
}

impl Default for MockPodApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPodApi {
    /// Pods succeed on the first status lookup unless scripted otherwise.
    pub fn new() -> Self {
        Self {
            phases: Mutex::new(VecDeque::from([Ok(PodPhase::Succeeded)])),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            status_calls: Mutex::new(0),
        }
    }

    pub fn with_phases(self, phases: impl IntoIterator<Item = PodPhase>) -> Self {
        *self.phases.lock().unwrap() = phases.into_iter().map(Ok).collect();
        self
    }

    pub fn with_phase_results(
        self,
        results: impl IntoIterator<Item = Result<PodPhase, PodSessionError>>,
    ) -> Self {
        *self.phases.lock().unwrap() = results.into_iter().collect();
        self
    }

    pub fn created(&self) -> Vec<PodRef> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<PodRef> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        *self.status_calls.lock().unwrap()
    }
}

#[async_trait]
impl PodApi for MockPodApi {
    async fn create_pod(&self, pod: &Pod) -> PodSessionResult<PodRef> {
        let name = pod.metadata.name.clone().unwrap_or_else(|| "pod".to_string());
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let pod_ref = PodRef::new(name, namespace);
        self.created.lock().unwrap().push(pod_ref.clone());
        Ok(pod_ref)
    }

    async fn pod_status(&self, _pod: &PodRef) -> PodSessionResult<PodStatusSnapshot> {
        *self.status_calls.lock().unwrap() += 1;
        let phase = next_scripted(&self.phases)
            .unwrap_or(Ok(PodPhase::Succeeded))
            .map_err(Report::new)?;
        let snapshot = PodStatusSnapshot::new(phase);
        Ok(match phase {
            PodPhase::Failed => snapshot.with_message("Error"),
            _ => snapshot,
        })
    }

    async fn delete_pod(&self, pod: &PodRef) -> PodSessionResult<()> {
        self.deleted.lock().unwrap().push(pod.clone());
        Ok(())
    }
}

/// [`PodSessionFactory`] that records where it was asked to connect.
pub struct MockPodSessions {
    api: Arc<MockPodApi>,
    connections: Mutex<Vec<ClusterConnectionInfo>>,
}

impl MockPodSessions {
    pub fn new(api: Arc<MockPodApi>) -> Self {
        Self {
            api,
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn connections(&self) -> Vec<ClusterConnectionInfo> {
        self.connections.lock().unwrap().clone()
    }
}

#[async_trait]
impl PodSessionFactory for MockPodSessions {
    async fn connect(&self, info: &ClusterConnectionInfo) -> PodSessionResult<Arc<dyn PodApi>> {
        self.connections.lock().unwrap().push(info.clone());
        let api: Arc<dyn PodApi> = self.api.clone();
        Ok(api)
    }
}
