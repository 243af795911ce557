//! Shared API type definitions
//!
//! This crate contains the records that cross process boundaries in the
//! cluster operation workflow: operation handles and statuses returned by the
//! control plane, the poll session a deferred trigger is rebuilt from, the
//! completion event a trigger emits, and cluster connection info.
//!
//! Everything here is plain data. Nothing holds a live connection or a
//! credential, so every type can be written to a durable trigger record and
//! read back on a different worker.

use core::fmt;
use core::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Project and region/zone pair that scopes every control plane call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterLocation {
    pub project_id: String,
    pub location: String,
}

impl ClusterLocation {
    pub fn new(project_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            location: location.into(),
        }
    }

    /// Resource parent path, e.g. `projects/my-project/locations/us-central1-a`.
    pub fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project_id, self.location)
    }
}

impl fmt::Display for ClusterLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.location)
    }
}

/// Handle returned by a submitted operation.
///
/// This is the only piece of submission state that has to survive a suspend
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationHandle {
    /// Opaque remote id of the operation
    pub name: String,
    /// Link to the operation resource itself
    #[serde(default)]
    pub self_link: String,
    /// Link to the resource the operation acts on
    #[serde(default)]
    pub target_link: String,
}

/// Lifecycle state of a remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    #[serde(rename = "STATUS_UNSPECIFIED")]
    Unspecified,
    Pending,
    Running,
    Done,
    Aborting,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unspecified => "STATUS_UNSPECIFIED",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Aborting => "ABORTING",
        };
        f.write_str(s)
    }
}

/// Status snapshot of a remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub name: String,
    pub state: OperationState,
    /// Human readable detail reported by the control plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Non-zero when a `Done` operation finished with an embedded failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
}

impl OperationStatus {
    pub fn new(name: impl Into<String>, state: OperationState) -> Self {
        Self {
            name: name.into(),
            state,
            message: None,
            error_code: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error_code(mut self, code: i32) -> Self {
        self.error_code = Some(code);
        self
    }

    /// Failure message carried by a finished operation, if any.
    pub fn embedded_failure(&self) -> Option<String> {
        match self.error_code {
            Some(code) if code != 0 => Some(
                self.message
                    .clone()
                    .unwrap_or_else(|| format!("Operation failed with error code {code}")),
            ),
            _ => None,
        }
    }
}

/// Whole seconds to wait between status lookups, never less than one.
///
/// Sub-second intervals are rounded up so a watch never polls faster than asked.
pub fn whole_poll_seconds(interval: Duration) -> u64 {
    interval.as_secs_f64().ceil().max(1.0) as u64
}

/// Serializable description of one deferred operation poll.
///
/// A trigger is reconstructed from this record after a restart, so it must
/// never hold anything but plain data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSession {
    pub operation_name: String,
    pub project_id: String,
    pub location: String,
    pub poll_interval_seconds: u64,
    pub started_at: DateTime<Utc>,
}

impl PollSession {
    pub fn new(
        operation_name: impl Into<String>,
        location: &ClusterLocation,
        poll_interval: Duration,
    ) -> Self {
        Self {
            operation_name: operation_name.into(),
            project_id: location.project_id.clone(),
            location: location.location.clone(),
            poll_interval_seconds: whole_poll_seconds(poll_interval),
            started_at: Utc::now(),
        }
    }

    /// Records written by hand may carry `0`; that still waits one second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn cluster_location(&self) -> ClusterLocation {
        ClusterLocation::new(self.project_id.clone(), self.location.clone())
    }
}

/// Terminal status carried by a completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Success,
    Failed,
    Error,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Why a failed event was produced, when the trigger can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureReason {
    /// The control plane could not be reached for the whole retry budget
    Unreachable,
}

/// The single event a trigger emits when it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub status: CompletionStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
}

impl CompletionEvent {
    pub fn success(message: impl Into<String>) -> Self {
        Self::with_status(CompletionStatus::Success, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::with_status(CompletionStatus::Failed, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_status(CompletionStatus::Error, message)
    }

    fn with_status(status: CompletionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            operation_name: None,
            reason: None,
        }
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_reason(mut self, reason: FailureReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, CompletionStatus::Failed | CompletionStatus::Error)
    }
}

/// Endpoint and CA certificate needed to open a connection to a cluster.
///
/// Derived from one get-cluster call and only ever carried forward inside the
/// resumable parameters of the current execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConnectionInfo {
    pub endpoint_host: String,
    /// Base64 encoded PEM bundle, as the control plane reports it
    pub ca_certificate: String,
}

impl ClusterConnectionInfo {
    pub fn new(endpoint_host: impl Into<String>, ca_certificate: impl Into<String>) -> Self {
        Self {
            endpoint_host: endpoint_host.into(),
            ca_certificate: ca_certificate.into(),
        }
    }

    /// Rebuild from the `cluster_url` form carried across a resume.
    pub fn from_cluster_url(cluster_url: &str, ca_certificate: impl Into<String>) -> Self {
        let host = cluster_url
            .strip_prefix("https://")
            .unwrap_or(cluster_url)
            .trim_end_matches('/');
        Self::new(host, ca_certificate)
    }

    pub fn cluster_url(&self) -> String {
        format!("https://{}", self.endpoint_host)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn completion_event_wire_format() {
        let event = CompletionEvent::success("Operation is successfully ended.")
            .with_operation_name("operation-123");
        let json = serde_json::to_value(&event).expect("should serialize event");

        assert_eq!(
            json,
            serde_json::json!({
                "status": "success",
                "message": "Operation is successfully ended.",
                "operation_name": "operation-123",
            })
        );

        let parsed: CompletionEvent =
            serde_json::from_value(serde_json::json!({"status": "failed", "message": "quota exceeded"}))
                .expect("should parse event without operation name");
        assert_eq!(parsed, CompletionEvent::failed("quota exceeded"));
        assert!(parsed.is_failure());
    }

    #[test]
    fn poll_intervals_are_whole_seconds_of_at_least_one() {
        assert_eq!(whole_poll_seconds(Duration::ZERO), 1);
        assert_eq!(whole_poll_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(whole_poll_seconds(Duration::from_secs(10)), 10);

        let location = ClusterLocation::new("p", "us-central1-a");
        let session = PollSession::new("operation-1", &location, Duration::ZERO);
        assert_eq!(session.poll_interval_seconds, 1);
    }

    #[test]
    fn restored_session_with_zero_interval_still_waits() {
        let session: PollSession = serde_json::from_value(serde_json::json!({
            "operation_name": "operation-1",
            "project_id": "p",
            "location": "us-central1-a",
            "poll_interval_seconds": 0,
            "started_at": "2024-01-01T00:00:00Z",
        }))
        .expect("should parse stored session");

        assert_eq!(session.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn operation_state_terminality() {
        assert!(!OperationState::Pending.is_terminal());
        assert!(!OperationState::Running.is_terminal());
        assert!(OperationState::Done.is_terminal());
        assert!(OperationState::Aborting.is_terminal());
        assert!(OperationState::Unspecified.is_terminal());

        let state: OperationState =
            serde_json::from_str("\"STATUS_UNSPECIFIED\"").expect("should parse state");
        assert_eq!(state, OperationState::Unspecified);
        assert_eq!(OperationState::Aborting.to_string(), "ABORTING");
    }

    #[test]
    fn embedded_failure_only_for_nonzero_codes() {
        let done = OperationStatus::new("op", OperationState::Done);
        assert_eq!(done.embedded_failure(), None);

        let zero = done.clone().with_error_code(0);
        assert_eq!(zero.embedded_failure(), None);

        let failed = done.with_error_code(8).with_message("quota exceeded");
        assert_eq!(failed.embedded_failure().as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn poll_session_rounds_interval_up() {
        let location = ClusterLocation::new("project", "us-central1-a");
        let session = PollSession::new("op", &location, Duration::from_millis(1500));

        assert_eq!(session.poll_interval(), Duration::from_secs(2));
        assert_eq!(session.cluster_location(), location);
        assert_eq!(location.parent(), "projects/project/locations/us-central1-a");
    }

    #[test]
    fn connection_info_url_round_trip() {
        let info = ClusterConnectionInfo::new("10.0.0.2", "Y2VydA==");
        assert_eq!(info.cluster_url(), "https://10.0.0.2");

        let rebuilt = ClusterConnectionInfo::from_cluster_url(&info.cluster_url(), "Y2VydA==");
        assert_eq!(rebuilt, info);
    }
}
