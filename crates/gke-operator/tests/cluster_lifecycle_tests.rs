use std::sync::Arc;
use std::time::Duration;

use api_types::ClusterLocation;
use api_types::CompletionEvent;
use api_types::FailureReason;
use api_types::OperationState;
use gke_operator::app::ResumeDispatcher;
use gke_operator::control_plane::ClusterEndpoints;
use gke_operator::control_plane::ControlPlaneError;
use gke_operator::coordinator::ClusterLifecycleCoordinator;
use gke_operator::coordinator::CoordinatorConfig;
use gke_operator::coordinator::ExecutionMode;
use gke_operator::coordinator::OperationKind;
use gke_operator::coordinator::TaskOutcome;
use gke_operator::error::LifecycleError;
use gke_operator::mock::MockControlPlane;
use gke_operator::mock::MockPodApi;
use gke_operator::mock::MockPodSessions;
use gke_operator::poller::PollerConfig;
use gke_operator::request::ClusterBody;
use gke_operator::request::ClusterSpec;
use gke_operator::request::CreateClusterRequest;
use gke_operator::request::DeleteClusterRequest;
use gke_operator::triggers::GkeTriggerExecutor;
use gke_operator::triggers::TriggerDescriptor;
use serde_json::json;
use similar_asserts::assert_eq;
use test_log::test;
use tokio::sync::mpsc;
use trigger_runtime::Continuation;
use trigger_runtime::ResumeKwargs;
use trigger_runtime::Triggerer;

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const CLUSTER_LINK: &str =
    "https://container.googleapis.com/v1/projects/p/locations/us-central1-a/clusters/c1";
const DELETE_OPERATION_LINK: &str =
    "https://container.googleapis.com/v1/projects/p/locations/us-central1-a/operations/operation-1";

fn location() -> ClusterLocation {
    ClusterLocation::new("p", "us-central1-a")
}

fn coordinator(mock: &Arc<MockControlPlane>) -> Arc<ClusterLifecycleCoordinator> {
    Arc::new(ClusterLifecycleCoordinator::new(
        mock.clone(),
        CoordinatorConfig::default().with_poll_interval(POLL_INTERVAL),
    ))
}

fn create_request() -> CreateClusterRequest {
    CreateClusterRequest::new(
        location(),
        ClusterSpec::new("c1").with_node_pools(vec![json!({"name": "pool", "initialNodeCount": 1})]),
    )
}

fn resume_kwargs() -> ResumeKwargs {
    let mut kwargs = ResumeKwargs::new();
    kwargs.insert("project_id".into(), json!("p"));
    kwargs.insert("location".into(), json!("us-central1-a"));
    kwargs
}

/// Runs a continuation through a fresh triggerer and returns the resumed result.
async fn resume_through_triggerer(
    mock: &Arc<MockControlPlane>,
    continuation: Continuation<TriggerDescriptor>,
) -> Result<Option<String>, error_stack::Report<LifecycleError>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatcher = ResumeDispatcher::new(coordinator(mock), None, tx);
    let executor = GkeTriggerExecutor::new(
        mock.clone(),
        Arc::new(MockPodSessions::new(Arc::new(MockPodApi::new()))),
        PollerConfig::default(),
    );
    let triggerer =
        Triggerer::<TriggerDescriptor>::new(Arc::new(executor), Arc::new(dispatcher));

    triggerer
        .register(continuation)
        .await
        .expect("should register trigger");
    let completion = rx.recv().await.expect("should receive completion");
    triggerer.shutdown().await;
    completion.result
}

#[test(tokio::test(start_paused = true))]
async fn invalid_body_never_reaches_the_control_plane() {
    let mock = Arc::new(MockControlPlane::new());
    let body = json!({"name": "c1", "initial_node_count": 2, "node_pools": [{"name": "p"}]});
    let serde_json::Value::Object(map) = body else {
        panic!("body should be an object");
    };

    let err = coordinator(&mock)
        .create_cluster(
            CreateClusterRequest::new(location(), ClusterBody::Mapping(map)),
            ExecutionMode::Synchronous { timeout: None },
        )
        .await
        .expect_err("mixed body should be rejected");

    assert!(matches!(
        err.current_context(),
        LifecycleError::Validation { .. }
    ));
    assert_eq!(mock.calls(), Vec::<String>::new());
}

#[test(tokio::test(start_paused = true))]
async fn existing_cluster_resolves_to_its_link() {
    let mock = Arc::new(
        MockControlPlane::new()
            .with_create_error(ControlPlaneError::AlreadyExists {
                resource: "c1".into(),
            })
            .with_cluster(ClusterEndpoints {
                name: "c1".into(),
                self_link: CLUSTER_LINK.into(),
                endpoint: "34.1.2.3".into(),
                private_endpoint: None,
                ca_certificate: "Y2VydA==".into(),
            }),
    );

    let outcome = coordinator(&mock)
        .create_cluster(create_request(), ExecutionMode::Deferred)
        .await
        .expect("existing cluster is not an error");

    assert_eq!(outcome, TaskOutcome::Complete(CLUSTER_LINK.to_string()));
    assert_eq!(mock.calls(), vec!["submit_create", "get_cluster"]);
}

#[test(tokio::test(start_paused = true))]
async fn synchronous_create_polls_until_done() {
    let mock = Arc::new(MockControlPlane::new().with_states([
        OperationState::Running,
        OperationState::Running,
        OperationState::Done,
    ]));

    let outcome = coordinator(&mock)
        .create_cluster(create_request(), ExecutionMode::Synchronous { timeout: None })
        .await
        .expect("create should succeed");

    assert_eq!(outcome, TaskOutcome::Complete(CLUSTER_LINK.to_string()));
    let instants = mock.poll_instants();
    assert_eq!(instants.len(), 3);
    assert_eq!(instants[1] - instants[0], POLL_INTERVAL);
    assert_eq!(instants[2] - instants[1], POLL_INTERVAL);
}

#[test(tokio::test(start_paused = true))]
async fn deferred_create_resumes_with_the_same_link() {
    let mock = Arc::new(MockControlPlane::new().with_states([
        OperationState::Pending,
        OperationState::Running,
        OperationState::Done,
    ]));

    let outcome = coordinator(&mock)
        .create_cluster(create_request(), ExecutionMode::Deferred)
        .await
        .expect("create should defer");
    let TaskOutcome::Deferred(continuation) = outcome else {
        panic!("expected a continuation");
    };

    assert_eq!(continuation.resume_entrypoint, "cluster_create_complete");
    assert_eq!(mock.call_count("get_operation_status"), 0);
    let TriggerDescriptor::Operation(session) = &continuation.trigger else {
        panic!("expected an operation trigger");
    };
    assert_eq!(session.operation_name, "operation-1");
    assert_eq!(session.poll_interval_seconds, 10);

    let stored = continuation.to_json().expect("should encode continuation");
    let restored = Continuation::<TriggerDescriptor>::from_json(&stored)
        .expect("should decode continuation");
    assert_eq!(restored, continuation);

    let result = resume_through_triggerer(&mock, restored)
        .await
        .expect("resumed create should succeed");

    assert_eq!(result, Some(CLUSTER_LINK.to_string()));
    assert_eq!(mock.call_count("get_operation_status"), 3);
    assert_eq!(mock.call_count("get_operation"), 1);
}

#[test(tokio::test(start_paused = true))]
async fn failed_event_resumes_as_operation_failure() {
    let mock = Arc::new(MockControlPlane::new());

    let err = coordinator(&mock)
        .on_poll_complete(
            OperationKind::Create,
            &CompletionEvent::failed("quota exceeded"),
            &resume_kwargs(),
        )
        .await
        .expect_err("failed event should raise");

    assert!(matches!(
        err.current_context(),
        LifecycleError::OperationFailed { message } if message == "quota exceeded"
    ));
    assert_eq!(mock.calls(), Vec::<String>::new());
}

#[test(tokio::test(start_paused = true))]
async fn unreachable_event_resumes_as_poll_exhaustion() {
    let mock = Arc::new(MockControlPlane::new());
    let event =
        CompletionEvent::error("control plane unreachable").with_reason(FailureReason::Unreachable);

    let err = coordinator(&mock)
        .on_poll_complete(OperationKind::Create, &event, &resume_kwargs())
        .await
        .expect_err("exhausted polling should raise");

    assert!(matches!(
        err.current_context(),
        LifecycleError::PollExhausted { .. }
    ));
}

#[test(tokio::test(start_paused = true))]
async fn success_without_operation_name_is_rejected() {
    let mock = Arc::new(MockControlPlane::new());

    let err = coordinator(&mock)
        .on_poll_complete(
            OperationKind::Delete,
            &CompletionEvent::success("Operation is successfully ended."),
            &resume_kwargs(),
        )
        .await
        .expect_err("event without operation name should raise");

    assert!(matches!(
        err.current_context(),
        LifecycleError::OperationFailed { .. }
    ));
}

#[test(tokio::test(start_paused = true))]
async fn resume_without_location_kwargs_is_rejected() {
    let mock = Arc::new(MockControlPlane::new());
    let event = CompletionEvent::success("done").with_operation_name("operation-1");

    let err = coordinator(&mock)
        .on_poll_complete(OperationKind::Create, &event, &ResumeKwargs::new())
        .await
        .expect_err("missing kwargs should raise");

    assert!(matches!(
        err.current_context(),
        LifecycleError::InvalidResume { .. }
    ));
}

#[test(tokio::test(start_paused = true))]
async fn synchronous_wait_honours_timeout() {
    let mock = Arc::new(MockControlPlane::new().with_states([OperationState::Running]));

    let err = coordinator(&mock)
        .create_cluster(
            create_request(),
            ExecutionMode::Synchronous {
                timeout: Some(Duration::from_secs(25)),
            },
        )
        .await
        .expect_err("wait should time out");

    assert!(matches!(
        err.current_context(),
        LifecycleError::Timeout { seconds: 25 }
    ));
    assert_eq!(mock.call_count("get_operation_status"), 3);
}

#[test(tokio::test(start_paused = true))]
async fn deleting_an_absent_cluster_is_a_no_op() {
    let mock = Arc::new(MockControlPlane::new().with_absent_cluster());

    let outcome = coordinator(&mock)
        .delete_cluster(
            DeleteClusterRequest::new(location(), "c1"),
            ExecutionMode::Deferred,
        )
        .await
        .expect("absent cluster is not an error");

    assert_eq!(outcome, TaskOutcome::Complete(None));
    assert_eq!(mock.calls(), vec!["submit_delete"]);
}

#[test(tokio::test(start_paused = true))]
async fn synchronous_delete_returns_operation_link() {
    let mock = Arc::new(
        MockControlPlane::new().with_states([OperationState::Running, OperationState::Done]),
    );

    let outcome = coordinator(&mock)
        .delete_cluster(
            DeleteClusterRequest::new(location(), "c1"),
            ExecutionMode::Synchronous { timeout: None },
        )
        .await
        .expect("delete should succeed");

    assert_eq!(
        outcome,
        TaskOutcome::Complete(Some(DELETE_OPERATION_LINK.to_string()))
    );
}

#[test(tokio::test(start_paused = true))]
async fn failed_operation_surfaces_its_message() {
    let mock = Arc::new(MockControlPlane::new().with_embedded_failure("quota exceeded"));

    let err = coordinator(&mock)
        .create_cluster(create_request(), ExecutionMode::Synchronous { timeout: None })
        .await
        .expect_err("embedded failure should raise");

    assert_eq!(err.current_context().to_string(), "quota exceeded");
    assert_eq!(mock.call_count("get_operation"), 0);
}

#[test(tokio::test(start_paused = true))]
async fn missing_delete_fields_are_rejected() {
    let mock = Arc::new(MockControlPlane::new());

    let err = coordinator(&mock)
        .delete_cluster(
            DeleteClusterRequest::new(location(), ""),
            ExecutionMode::Deferred,
        )
        .await
        .expect_err("empty name should be rejected");

    assert!(matches!(
        err.current_context(),
        LifecycleError::Validation { .. }
    ));
    assert_eq!(mock.calls(), Vec::<String>::new());
}
