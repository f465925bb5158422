//! Common types for ekspose: errors, backoff policy, and client bootstrap

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager / reporting component used for every write to the API server
pub const FIELD_MANAGER: &str = "ekspose-controller";

/// Name of the work queue, used in log records
pub const QUEUE_NAME: &str = "ekspose";

/// Delimiter between namespace and name in a work item key
pub const KEY_DELIMITER: char = '/';

/// Label key marking resources created by this controller
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value for [`LABEL_MANAGED_BY`]
pub const LABEL_MANAGED_BY_EKSPOSE: &str = "ekspose";

/// Ingress annotation requesting that the matched prefix be rewritten
pub const REWRITE_TARGET_ANNOTATION: &str = "nginx.ingress.kubernetes.io/rewrite-target";

/// Name of the single port on every exposure Service
pub const EXPOSURE_PORT_NAME: &str = "http";

/// Port number of the single port on every exposure Service
pub const EXPOSURE_PORT: i32 = 80;
