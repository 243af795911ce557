use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use url::Url;
use utils::version;

use crate::domain::coordinator::ExecutionMode;
use crate::domain::pod::OnFinishAction;
use crate::domain::poller::PollerConfig;
use crate::domain::poller::UnreachablePolicy;
use crate::infrastructure::gke_client::DEFAULT_ENDPOINT;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a cluster and wait for it
    #[command(name = "create-cluster")]
    CreateCluster(Box<CreateClusterArgs>),
    /// Delete a cluster and wait for it
    #[command(name = "delete-cluster")]
    DeleteCluster(DeleteClusterArgs),
    /// Run a pod on an existing cluster and wait for it
    #[command(name = "start-pod")]
    StartPod(Box<StartPodArgs>),
}

/// Settings shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    #[arg(long, env = "GKE_PROJECT_ID", help = "Project that owns the cluster")]
    pub project_id: String,

    #[arg(
        long,
        env = "GKE_LOCATION",
        help = "Region or zone of the cluster, e.g. us-central1-a"
    )]
    pub location: String,

    #[arg(
        long,
        env = "GKE_ACCESS_TOKEN",
        hide_env_values = true,
        help = "OAuth access token for the control plane and cluster API"
    )]
    pub access_token: String,

    #[arg(
        long,
        env = "GKE_ENDPOINT",
        default_value = DEFAULT_ENDPOINT,
        help = "Base URL of the container API"
    )]
    pub endpoint: Url,

    #[arg(
        long,
        default_value_t = 5,
        help = "Consecutive failed status lookups before polling gives up"
    )]
    pub max_transient_failures: u32,

    #[arg(
        long,
        value_enum,
        default_value_t = UnreachablePolicy::Distinct,
        help = "How to report polling that gave up on an unreachable API"
    )]
    pub unreachable_policy: UnreachablePolicy,

    #[arg(
        long,
        help = "Hard limit in seconds for deferred waits, unlimited if unset"
    )]
    pub trigger_timeout_secs: Option<u64>,
}

impl GlobalArgs {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig::default()
            .with_max_transient_failures(self.max_transient_failures)
            .with_unreachable_policy(self.unreachable_policy)
    }
}

/// How the command waits for its remote work.
#[derive(Args, Debug, Clone)]
pub struct WaitArgs {
    #[arg(
        long,
        help = "Suspend and let a trigger watch the operation instead of polling in place"
    )]
    pub deferred: bool,

    #[arg(
        long,
        conflicts_with = "deferred",
        help = "Give up waiting after this many seconds (synchronous mode only)"
    )]
    pub timeout_secs: Option<u64>,
}

impl WaitArgs {
    pub fn mode(&self) -> ExecutionMode {
        if self.deferred {
            ExecutionMode::Deferred
        } else {
            ExecutionMode::Synchronous {
                timeout: self.timeout_secs.map(Duration::from_secs),
            }
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CreateClusterArgs {
    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "Cluster definition, YAML or JSON"
    )]
    pub body: PathBuf,

    #[arg(long, help = "Key to correlate retried submissions, defaults to the cluster name")]
    pub idempotency_key: Option<String>,

    #[arg(long, default_value_t = 10, help = "Seconds between operation status lookups")]
    pub poll_interval_secs: u64,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteClusterArgs {
    #[arg(long, help = "Name of the cluster to delete")]
    pub name: String,

    #[arg(long, default_value_t = 10, help = "Seconds between operation status lookups")]
    pub poll_interval_secs: u64,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StartPodArgs {
    #[arg(long, help = "Cluster to run the pod on")]
    pub cluster_name: String,

    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "Pod manifest, YAML or JSON"
    )]
    pub pod: PathBuf,

    #[arg(long, help = "Connect through the cluster's private endpoint")]
    pub use_internal_ip: bool,

    #[arg(long, default_value = crate::domain::bridge::DEFAULT_GCP_CONN_ID)]
    pub gcp_conn_id: String,

    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "Not supported; rejected if given"
    )]
    pub config_file: Option<PathBuf>,

    #[arg(long, value_enum, help = "What to do with the pod once it finished")]
    pub on_finish_action: Option<OnFinishAction>,

    #[arg(long, help = "Deprecated, use --on-finish-action")]
    pub is_delete_operator_pod: Option<bool>,

    #[arg(long, help = "Deprecated, has no effect")]
    pub regional: Option<bool>,

    #[arg(long, default_value = "default", help = "Namespace for pods that do not set one")]
    pub namespace: String,

    #[arg(long, default_value_t = 2, help = "Seconds between pod status lookups")]
    pub poll_interval_secs: u64,

    #[arg(
        long,
        default_value_t = 120,
        help = "Seconds a pod may stay pending before it counts as failed"
    )]
    pub startup_timeout_secs: u64,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use similar_asserts::assert_eq;

    use super::*;

    const GLOBAL: [&str; 7] = [
        "gke-operator",
        "--project-id",
        "p",
        "--location",
        "us-central1",
        "--access-token",
        "t",
    ];

    fn parse(extra: &[&str]) -> Cli {
        Cli::try_parse_from(GLOBAL.iter().chain(extra)).expect("arguments should parse")
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn delete_defaults_to_synchronous_wait() {
        let cli = parse(&["delete-cluster", "--name", "c1"]);
        let Commands::DeleteCluster(args) = cli.command else {
            panic!("expected delete-cluster");
        };
        assert_eq!(args.wait.mode(), ExecutionMode::Synchronous { timeout: None });
        assert_eq!(cli.global.endpoint.as_str(), DEFAULT_ENDPOINT);
    }

    #[test]
    fn start_pod_parses_finish_action() {
        let cli = parse(&[
            "start-pod",
            "--cluster-name",
            "c1",
            "--pod",
            "pod.yaml",
            "--on-finish-action",
            "delete-succeeded-pod",
            "--deferred",
        ]);
        let Commands::StartPod(args) = cli.command else {
            panic!("expected start-pod");
        };
        assert_eq!(args.on_finish_action, Some(OnFinishAction::DeleteSucceededPod));
        assert_eq!(args.wait.mode(), ExecutionMode::Deferred);
    }

    #[test]
    fn deferred_conflicts_with_timeout() {
        let result = Cli::try_parse_from(GLOBAL.iter().chain(&[
            "delete-cluster",
            "--name",
            "c1",
            "--deferred",
            "--timeout-secs",
            "5",
        ]));
        assert!(result.is_err());
    }
}
