use std::time::Duration;

use clap::Args;

pub const REPORTER: &str = "operand-lifecycle-operator";

/// Runtime settings for the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Re-check interval while installations are still progressing.
    pub requeue_interval: Duration,
    /// Requeue delay after a failed pass.
    pub error_backoff: Duration,
    /// Requeue delay after an optimistic-concurrency conflict.
    pub conflict_backoff: Duration,
    pub reporter: String,
    pub instance: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            requeue_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(10),
            conflict_backoff: Duration::from_secs(1),
            reporter: REPORTER.to_string(),
            instance: None,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Log filter: trace, debug, info, warn, error, or a full EnvFilter directive.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Seconds between re-checks while operators are still installing.
    #[arg(long, default_value_t = 30, env = "OPREQ_REQUEUE_SECS")]
    pub requeue_secs: u64,

    /// Seconds to wait before retrying a failed reconcile.
    #[arg(long, default_value_t = 10, env = "OPREQ_ERROR_BACKOFF_SECS")]
    pub error_backoff_secs: u64,

    /// Instance name reported on Kubernetes Events.
    #[arg(long, env = "OPREQ_INSTANCE")]
    pub instance: Option<String>,
}

impl From<&RunArgs> for OperatorConfig {
    fn from(args: &RunArgs) -> Self {
        Self {
            requeue_interval: Duration::from_secs(args.requeue_secs),
            error_backoff: Duration::from_secs(args.error_backoff_secs),
            instance: args.instance.clone(),
            ..Self::default()
        }
    }
}
