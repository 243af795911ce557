//! Poll loop shared by operation and pod triggers.

use core::error::Error;
use std::sync::Arc;
use std::time::Duration;

use api_types::ClusterLocation;
use api_types::CompletionEvent;
use api_types::FailureReason;
use api_types::OperationState;
use api_types::PollSession;
use async_trait::async_trait;
use error_stack::Report;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::domain::control_plane::OperationControlPlane;

/// Result of a single status lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Not finished yet
    Pending { detail: String },
    /// Finished; this is the event to emit
    Terminal(CompletionEvent),
}

/// Why a status lookup failed.
#[derive(Debug, derive_more::Display)]
pub enum ProbeError {
    /// Worth retrying after the next interval
    #[display("{message}")]
    Transient { message: String },
    /// Retrying cannot help, the session ends with an error event
    #[display("{message}")]
    Fatal { message: String },
}

impl Error for ProbeError {}

/// One status lookup against whatever the poller is watching.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    /// Short description used in logs
    fn subject(&self) -> String;

    async fn probe(&self) -> Result<ProbeOutcome, Report<ProbeError>>;
}

/// How to report a session that gave up after transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UnreachablePolicy {
    /// Emit an `error` event flagged as unreachable, resolved as poll exhaustion
    #[default]
    Distinct,
    /// Emit a plain `error` event, indistinguishable from other failures
    Generic,
}

/// Poller tuning shared by every session.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Consecutive failed lookups after which the session gives up
    pub max_transient_failures: u32,
    pub unreachable_policy: UnreachablePolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_transient_failures: 5,
            unreachable_policy: UnreachablePolicy::default(),
        }
    }
}

impl PollerConfig {
    pub fn with_max_transient_failures(mut self, max: u32) -> Self {
        self.max_transient_failures = max.max(1);
        self
    }

    pub fn with_unreachable_policy(mut self, policy: UnreachablePolicy) -> Self {
        self.unreachable_policy = policy;
        self
    }
}

/// Polls a probe until it reports a terminal state, then yields exactly one event.
///
/// The first lookup happens immediately and each following one waits a full
/// interval after the previous lookup returned, so the poller never runs
/// faster than configured.
pub struct OperationPoller<P> {
    probe: P,
    interval: Duration,
    config: PollerConfig,
}

impl<P: StatusProbe> OperationPoller<P> {
    pub fn new(probe: P, interval: Duration, config: PollerConfig) -> Self {
        Self {
            probe,
            interval,
            config,
        }
    }

    #[instrument(skip(self), fields(subject = %self.probe.subject(), interval = ?self.interval))]
    pub async fn run(&self) -> CompletionEvent {
        let mut polls: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            polls += 1;
            match self.probe.probe().await {
                Ok(ProbeOutcome::Terminal(event)) => {
                    info!(polls, status = %event.status, "{}", event.message);
                    return event;
                }
                Ok(ProbeOutcome::Pending { detail }) => {
                    consecutive_failures = 0;
                    info!(polls, "Still waiting: {detail}");
                }
                Err(report) => match report.current_context() {
                    ProbeError::Transient { message } => {
                        consecutive_failures += 1;
                        if consecutive_failures >= self.config.max_transient_failures {
                            return self.exhausted(consecutive_failures, message);
                        }
                        warn!(
                            polls,
                            consecutive_failures,
                            "Status lookup failed, retrying: {report:?}"
                        );
                    }
                    ProbeError::Fatal { message } => {
                        warn!(polls, "Status lookup failed permanently: {report:?}");
                        return CompletionEvent::error(message.clone());
                    }
                },
            }

            debug!(sleep = ?self.interval, "Sleeping before next poll");
            tokio::time::sleep(self.interval).await;
        }
    }

    fn exhausted(&self, failures: u32, last_error: &str) -> CompletionEvent {
        let message = format!(
            "Gave up after {failures} consecutive failed status lookups: {last_error}"
        );
        warn!("{message}");
        let event = CompletionEvent::error(message);
        match self.config.unreachable_policy {
            UnreachablePolicy::Distinct => event.with_reason(FailureReason::Unreachable),
            UnreachablePolicy::Generic => event,
        }
    }
}

/// Watches a remote operation through the control plane.
pub struct OperationProbe {
    control_plane: Arc<dyn OperationControlPlane>,
    location: ClusterLocation,
    operation_name: String,
}

impl OperationProbe {
    /// Rebuilds the probe from a (possibly deserialized) poll session.
    pub fn new(control_plane: Arc<dyn OperationControlPlane>, session: &PollSession) -> Self {
        Self {
            control_plane,
            location: session.cluster_location(),
            operation_name: session.operation_name.clone(),
        }
    }
}

#[async_trait]
impl StatusProbe for OperationProbe {
    fn subject(&self) -> String {
        format!("operation {} in {}", self.operation_name, self.location)
    }

    async fn probe(&self) -> Result<ProbeOutcome, Report<ProbeError>> {
        let status = self
            .control_plane
            .get_operation_status(&self.location, &self.operation_name)
            .await
            .map_err(|report| {
                let message = report.current_context().to_string();
                let context = if report.current_context().is_transient() {
                    ProbeError::Transient { message }
                } else {
                    ProbeError::Fatal { message }
                };
                report.change_context(context)
            })?;

        let outcome = match status.state {
            OperationState::Pending | OperationState::Running => ProbeOutcome::Pending {
                detail: format!("operation {} is {}", status.name, status.state),
            },
            OperationState::Done => match status.embedded_failure() {
                Some(failure) => ProbeOutcome::Terminal(
                    CompletionEvent::failed(failure).with_operation_name(status.name),
                ),
                None => ProbeOutcome::Terminal(
                    CompletionEvent::success("Operation is successfully ended.")
                        .with_operation_name(status.name),
                ),
            },
            OperationState::Aborting | OperationState::Unspecified => {
                ProbeOutcome::Terminal(
                    CompletionEvent::failed(format!(
                        "Operation has failed with status: {}",
                        status.state
                    ))
                    .with_operation_name(status.name),
                )
            }
        };
        Ok(outcome)
    }
}
