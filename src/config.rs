//! Command line surface
//!
//! Flags are parsed once in `main` and turned into explicit component
//! configuration; nothing below reads flags or environment on its own.

use crate::controller::informer::DEFAULT_ROLLOUT_RESYNC_SECS;
use crate::controller::manager::{
    ManagerConfig, WorkerCounts, DEFAULT_EXPERIMENT_THREADS, DEFAULT_METRICS_PORT,
    DEFAULT_ROLLOUT_THREADS, DEFAULT_SERVICE_THREADS, DEFAULT_SHUTDOWN_GRACE_SECS,
};
use clap::{Parser, ValueEnum};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Crates whose logs follow `--client-loglevel`
const CLIENT_CRATES: [&str; 3] = ["kube", "hyper", "tower"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "rollouts-controller",
    about = "Progressive delivery controller for blue-green and canary Rollouts"
)]
pub struct Args {
    /// Path to a kubeconfig file (in-cluster or default config when unset)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// Kubeconfig cluster to use
    #[arg(long)]
    pub cluster: Option<String>,

    /// Kubeconfig user to use
    #[arg(long)]
    pub user: Option<String>,

    /// Only watch resources in this namespace
    #[arg(long)]
    pub namespace: Option<String>,

    /// Seconds between periodic resyncs (0 disables resync)
    #[arg(long, default_value_t = DEFAULT_ROLLOUT_RESYNC_SECS)]
    pub rollout_resync: u64,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Log level for the Kubernetes client libraries
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    pub client_loglevel: LogLevel,

    #[arg(long, default_value_t = DEFAULT_ROLLOUT_THREADS)]
    pub rollout_threads: usize,

    #[arg(long, default_value_t = DEFAULT_EXPERIMENT_THREADS)]
    pub experiment_threads: usize,

    #[arg(long, default_value_t = DEFAULT_SERVICE_THREADS)]
    pub service_threads: usize,

    /// Port for the health and metrics endpoints
    #[arg(long, default_value_t = DEFAULT_METRICS_PORT)]
    pub metricsport: u16,

    /// Seconds in-flight reconciliations get to finish on shutdown
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS)]
    pub shutdown_grace: u64,
}

impl Args {
    /// Informer resync period; `None` when `--rollout-resync` is 0
    pub fn resync(&self) -> Option<Duration> {
        (self.rollout_resync > 0).then(|| Duration::from_secs(self.rollout_resync))
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            metrics_port: Some(self.metricsport),
            shutdown_grace: Duration::from_secs(self.shutdown_grace),
            namespace: self.namespace.clone(),
        }
    }

    pub fn worker_counts(&self) -> WorkerCounts {
        WorkerCounts {
            rollout: self.rollout_threads,
            experiment: self.experiment_threads,
            service: self.service_threads,
        }
    }

    /// Directives for `--loglevel` and `--client-loglevel`
    pub fn log_directives(&self) -> String {
        let mut directives = vec![self.loglevel.to_string()];
        directives.extend(
            CLIENT_CRATES
                .iter()
                .map(|krate| format!("{}={}", krate, self.client_loglevel)),
        );
        directives.join(",")
    }

    /// Log filter; `RUST_LOG` takes precedence when set
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.log_directives()))
    }

    pub fn kubeconfig_options(&self) -> kube::config::KubeConfigOptions {
        kube::config::KubeConfigOptions {
            context: self.context.clone(),
            cluster: self.cluster.clone(),
            user: self.user.clone(),
        }
    }
}
