//! ekspose - exposes every Deployment through a Service and an Ingress

mod controller_runner;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use ekspose_common::kube_utils::create_client;
use ekspose_common::retry::BackoffPolicy;
use ekspose_common::telemetry::{init_logging, LogFormat, TelemetryConfig};
use ekspose_controller::RoutingOptions;

use controller_runner::{shutdown_signal, ControllerConfig};

/// ekspose - keeps a Service and an Ingress alongside every Deployment
#[derive(Parser, Debug)]
#[command(name = "ekspose", version, about, long_about = None)]
struct Cli {
    /// Path to a kubeconfig file; falls back to in-cluster config if unusable
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Only watch this namespace (default: all namespaces)
    #[arg(long, env = "EKSPOSE_NAMESPACE")]
    namespace: Option<String>,

    /// Number of concurrent workers
    #[arg(
        long,
        env = "EKSPOSE_WORKERS",
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    workers: u16,

    /// Initial per-key retry delay in milliseconds
    #[arg(long, default_value_t = 5)]
    backoff_base_ms: u64,

    /// Maximum per-key retry delay in seconds
    #[arg(long, default_value_t = 1000)]
    backoff_max_secs: u64,

    /// Re-enqueue every cached workload this often; 0 disables
    #[arg(long, default_value_t = 600)]
    resync_period_secs: u64,

    /// Seconds to wait for the initial cache sync before starting anyway
    #[arg(long, default_value_t = 60)]
    cache_sync_timeout_secs: u64,

    /// ingressClassName to set on routing records
    #[arg(long, env = "EKSPOSE_INGRESS_CLASS")]
    ingress_class: Option<String>,

    /// Log output format (json or text)
    #[arg(long, env = "EKSPOSE_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,
}

impl Cli {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            namespace: self.namespace.clone(),
            workers: usize::from(self.workers),
            backoff: BackoffPolicy::new(
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_secs(self.backoff_max_secs),
            ),
            resync_period: (self.resync_period_secs > 0)
                .then(|| Duration::from_secs(self.resync_period_secs)),
            cache_sync_timeout: Duration::from_secs(self.cache_sync_timeout_secs),
            routing: RoutingOptions {
                ingress_class: self.ingress_class.clone(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&TelemetryConfig {
        service_name: "ekspose".to_string(),
        format: cli.log_format,
    })?;

    let client = create_client(cli.kubeconfig.as_deref())
        .await
        .context("failed to create kubernetes client")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        });
    }

    controller_runner::run(client, cli.controller_config(), cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("ekspose").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_produce_default_controller_config() {
        let cli = parse(&[]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.controller_config(), ControllerConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = parse(&[
            "--namespace",
            "apps",
            "--workers",
            "4",
            "--backoff-base-ms",
            "10",
            "--backoff-max-secs",
            "60",
            "--ingress-class",
            "nginx",
            "--log-format",
            "text",
        ])
        .unwrap();
        let config = cli.controller_config();

        assert_eq!(config.namespace.as_deref(), Some("apps"));
        assert_eq!(config.workers, 4);
        assert_eq!(
            config.backoff,
            BackoffPolicy::new(Duration::from_millis(10), Duration::from_secs(60))
        );
        assert_eq!(config.routing.ingress_class.as_deref(), Some("nginx"));
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn zero_resync_period_disables_resync() {
        let cli = parse(&["--resync-period-secs", "0"]).unwrap();
        assert_eq!(cli.controller_config().resync_period, None);
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(parse(&["--workers", "0"]).is_err());
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(parse(&["--log-format", "xml"]).is_err());
    }
}
