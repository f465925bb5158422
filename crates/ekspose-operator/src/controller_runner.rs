//! Controller runner - wires the feed, queue, reconciler, and workers together
//!
//! Startup order: start the change feed, wait (advisory) for its cache to
//! sync, then start the workers and the periodic resync. Shutdown is driven by
//! a single cancellation token: the queue is shut down, workers drain the
//! keys already pending and exit, and the feed is stopped last.

use std::sync::Arc;
use std::time::Duration;

use ekspose_common::retry::BackoffPolicy;
use ekspose_common::QUEUE_NAME;
use ekspose_controller::{
    ChangeFeed, Dispatcher, ExposeKubeClientImpl, Reconciler, RoutingOptions, WorkQueue,
};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runtime settings for one controller instance
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Namespace to watch, or every namespace when `None`
    pub namespace: Option<String>,
    /// Number of concurrent workers
    pub workers: usize,
    /// Per-key retry backoff
    pub backoff: BackoffPolicy,
    /// Interval for re-enqueueing every cached workload, disabled when `None`
    pub resync_period: Option<Duration>,
    /// How long to wait for the initial cache sync before starting anyway
    pub cache_sync_timeout: Duration,
    /// Shape of the routing records
    pub routing: RoutingOptions,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            workers: 1,
            backoff: BackoffPolicy::default(),
            resync_period: Some(Duration::from_secs(600)),
            cache_sync_timeout: Duration::from_secs(60),
            routing: RoutingOptions::default(),
        }
    }
}

/// Run the controller until `cancel` fires
pub async fn run(
    client: Client,
    config: ControllerConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let api: Api<Deployment> = match &config.namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let queue: WorkQueue<String> = WorkQueue::new(QUEUE_NAME, config.backoff.clone());
    let feed = Arc::new(ChangeFeed::new(queue.clone()));
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(ExposeKubeClientImpl::new(client)),
        Arc::new(feed.cache()),
        config.routing.clone(),
    ));

    info!(
        namespace = config.namespace.as_deref().unwrap_or("<all>"),
        workers = config.workers,
        "starting ekspose controller"
    );

    let feed_cancel = CancellationToken::new();
    let feed_task = {
        let feed = feed.clone();
        let feed_cancel = feed_cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = feed.run(api, feed_cancel).await {
                error!(error = %e, "change feed failed");
            }
        })
    };

    tokio::select! {
        _ = cancel.cancelled() => {
            warn!("shutdown requested before workload cache synced");
        }
        _ = feed.wait_for_sync(config.cache_sync_timeout) => {}
    }

    let mut tasks: Vec<JoinHandle<()>> = (0..config.workers)
        .map(|id| {
            let worker = Dispatcher::new(id, queue.clone(), reconciler.clone());
            tokio::spawn(worker.run())
        })
        .collect();

    if let Some(period) = config.resync_period {
        tasks.push(tokio::spawn(resync_loop(feed.clone(), period, cancel.clone())));
    }

    cancel.cancelled().await;
    info!("shutting down");

    queue.shut_down();
    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!(error = %e, "controller task panicked");
        }
    }

    feed_cancel.cancel();
    if let Err(e) = feed_task.await {
        error!(error = %e, "change feed task panicked");
    }

    info!("controller stopped");
    Ok(())
}

async fn resync_loop(feed: Arc<ChangeFeed>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    // First tick fires immediately; the initial listing already enqueued everything
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                feed.resync();
            }
        }
    }
}

/// Resolve on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = ctrl_c() => info!("received SIGINT"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    }

    ctrl_c().await;
    info!("received SIGINT");
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for SIGINT");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.namespace, None);
        assert_eq!(config.workers, 1);
        assert_eq!(config.backoff, BackoffPolicy::default());
        assert_eq!(config.resync_period, Some(Duration::from_secs(600)));
        assert_eq!(config.cache_sync_timeout, Duration::from_secs(60));
        assert_eq!(config.routing.ingress_class, None);
    }

    #[tokio::test(start_paused = true)]
    async fn resync_loop_stops_on_cancel() {
        let queue: WorkQueue<String> = WorkQueue::new("test", BackoffPolicy::default());
        let feed = Arc::new(ChangeFeed::new(queue));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(resync_loop(feed, Duration::from_secs(1), cancel.clone()));
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("resync loop should stop")
            .unwrap();
    }
}
