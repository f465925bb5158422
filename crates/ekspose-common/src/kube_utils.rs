//! Shared Kubernetes utilities using kube-rs
//!
//! Client bootstrap (explicit kubeconfig with in-cluster fallback) and the
//! mapping from raw API failures to the classified [`Error`] variants the
//! reconciler branches on.

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{info, warn};

use crate::{Error, Result};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP status returned by the API server for a missing object
const STATUS_NOT_FOUND: u16 = 404;
/// HTTP status returned by the API server when a create collides
const STATUS_CONFLICT: u16 = 409;
/// Status reason distinguishing "already exists" from other 409 conflicts
const REASON_ALREADY_EXISTS: &str = "AlreadyExists";

/// Create a kube client from an optional kubeconfig path with default timeouts
///
/// An explicit path is tried first. If it cannot be read or loaded, the
/// failure is logged and the client falls back to the in-cluster / inferred
/// configuration. Only a failure of the fallback as well is returned.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from an optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => match load_kubeconfig(path).await {
            Ok(config) => {
                info!(path = %path.display(), "loaded kubeconfig");
                config
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to load kubeconfig, falling back to in-cluster config"
                );
                infer_config().await?
            }
        },
        None => infer_config().await?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::bootstrap_with_context("create_client", format!("failed to create client: {}", e))
    })
}

async fn load_kubeconfig(path: &Path) -> Result<Config> {
    let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
        Error::bootstrap_with_context("kubeconfig", format!("failed to read kubeconfig: {}", e))
    })?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::bootstrap_with_context("kubeconfig", format!("failed to load kubeconfig: {}", e))
        })
}

async fn infer_config() -> Result<Config> {
    Config::infer().await.map_err(|e| {
        Error::bootstrap_with_context("in-cluster", format!("failed to infer config: {}", e))
    })
}

/// Map a raw kube error for the named object into a classified [`Error`].
///
/// 404 becomes [`Error::NotFound`], 409 with reason `AlreadyExists` becomes
/// [`Error::AlreadyExists`]; everything else is wrapped as [`Error::Kube`].
pub fn classify(err: kube::Error, kind: &str, namespace: &str, name: &str) -> Error {
    match &err {
        kube::Error::Api(ae) if ae.code == STATUS_NOT_FOUND => {
            Error::not_found(kind, namespace, name)
        }
        kube::Error::Api(ae)
            if ae.code == STATUS_CONFLICT && ae.reason == REASON_ALREADY_EXISTS =>
        {
            Error::already_exists(kind, namespace, name)
        }
        _ => Error::from(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} from api server", reason),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn classify_maps_404_to_not_found() {
        let err = classify(api_error(404, "NotFound"), "Deployment", "ns", "app1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Deployment ns/app1 not found");
    }

    #[test]
    fn classify_maps_already_exists_conflict() {
        let err = classify(api_error(409, "AlreadyExists"), "Service", "ns", "app1");
        assert!(err.is_already_exists());
    }

    #[test]
    fn classify_keeps_other_conflicts_raw() {
        // Optimistic-concurrency conflicts are not "already exists"
        let err = classify(api_error(409, "Conflict"), "Service", "ns", "app1");
        assert!(!err.is_already_exists());
        assert!(matches!(err, Error::Kube { .. }));
    }

    #[test]
    fn classify_wraps_server_errors() {
        let err = classify(api_error(500, "InternalError"), "Ingress", "ns", "app1");
        assert!(matches!(err, Error::Kube { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unreadable_kubeconfig_is_reported_as_bootstrap_error() {
        let err = load_kubeconfig(Path::new("/nonexistent/ekspose/kubeconfig"))
            .await
            .expect_err("missing file must not load");
        assert!(matches!(
            &err,
            Error::Bootstrap { context, .. } if context == "kubeconfig"
        ));
    }
}
