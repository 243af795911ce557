//! Deferred execution runtime.
//!
//! This library runs the lightweight watchers ("triggers") that stand in for a
//! suspended task. The pattern is:
//!
//! - A task starts a long running remote operation, then returns a
//!   [`Continuation`]: serializable trigger parameters plus the name of the
//!   entrypoint to resume
//! - The [`Triggerer`] runs the trigger as its own tokio task, sharing the
//!   runtime with every other trigger instead of holding a worker
//! - When the trigger reaches a terminal state its single completion event is
//!   handed to the [`ResumeHandler`], exactly once
//!
//! # Features
//!
//! - Generic trigger descriptors, executed by a pluggable [`TriggerExecutor`]
//! - Exactly-once delivery, cancellation without delivery
//! - Optional hard timeout per trigger
//! - JSON encoding of continuations for durable storage
//!
//! # Examples
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use api_types::CompletionEvent;
//! # use trigger_runtime::{Continuation, Resumption, TriggerExecutor, Triggerer};
//! # use serde::{Deserialize, Serialize};
//! #
//! # #[derive(Debug, Clone, Serialize, Deserialize)]
//! # struct Sleep { seconds: u64 }
//! #
//! # struct SleepExecutor;
//! #
//! # #[async_trait::async_trait]
//! # impl TriggerExecutor<Sleep> for SleepExecutor {
//! #     async fn run(&self, d: &Sleep) -> CompletionEvent {
//! #         tokio::time::sleep(std::time::Duration::from_secs(d.seconds)).await;
//! #         CompletionEvent::success("slept")
//! #     }
//! # }
//! #
//! # async fn demo() {
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Resumption>();
//! let triggerer = Triggerer::<Sleep>::new(Arc::new(SleepExecutor), Arc::new(tx));
//!
//! triggerer
//!     .register(Continuation::new(Sleep { seconds: 1 }, "execute_complete"))
//!     .await
//!     .expect("runtime accepts triggers");
//!
//! let resumption = rx.recv().await.expect("one event");
//! assert_eq!(resumption.entrypoint, "execute_complete");
//! # }
//! ```

pub mod config;
pub mod error;
pub mod triggerer;
pub mod types;

pub use config::TriggererConfig;
pub use error::TriggerError;
pub use error::TriggerResult;
pub use triggerer::TriggerStats;
pub use triggerer::Triggerer;
pub use types::Continuation;
pub use types::ResumeHandler;
pub use types::ResumeKwargs;
pub use types::Resumption;
pub use types::TriggerExecutor;
pub use types::TriggerId;
pub use types::TriggerState;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Serialize;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestTrigger {
        id: u64,
        interval_seconds: u64,
    }

    #[test]
    fn continuation_json_round_trip() {
        let continuation = Continuation::new(
            TestTrigger {
                id: 7,
                interval_seconds: 10,
            },
            "execute_complete",
        )
        .with_kwarg("cluster_url", "https://10.0.0.1")
        .with_kwarg("ssl_ca_cert", "Y2E=");

        let json = continuation.to_json().expect("should serialize continuation");
        let decoded =
            Continuation::<TestTrigger>::from_json(&json).expect("should deserialize continuation");

        assert_eq!(decoded, continuation);
        assert_eq!(
            decoded.resume_kwargs.get("cluster_url"),
            Some(&serde_json::json!("https://10.0.0.1"))
        );
    }

    #[test]
    fn continuation_rejects_garbage() {
        let err = Continuation::<TestTrigger>::from_json("{not json")
            .expect_err("should fail to deserialize");
        assert!(matches!(
            err.current_context(),
            TriggerError::Serialization { .. }
        ));
    }

    #[test]
    fn triggerer_config_builder() {
        let config = TriggererConfig::default()
            .with_trigger_timeout(Duration::from_secs(600))
            .with_max_history_size(10)
            .with_shutdown_grace(Duration::from_secs(5));

        assert_eq!(config.trigger_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.max_history_size, 10);
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn trigger_ids_are_unique() {
        assert_ne!(TriggerId::new(), TriggerId::new());
    }
}
