//! Error types for the ekspose controller
//!
//! Errors are structured with fields to aid debugging in production.
//! Store failures that the reconciler must branch on (not-found on the
//! delete path, already-exists on the create path) get their own variants so
//! callers never have to inspect raw API status codes.

use thiserror::Error;

/// Main error type for ekspose operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that is not one of the classified cases below
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The addressed object does not exist in the store
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Resource kind (Deployment, Service, Ingress)
        kind: String,
        /// Namespace of the object
        namespace: String,
        /// Name of the object
        name: String,
    },

    /// A create was rejected because the object already exists
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        /// Resource kind (Service, Ingress)
        kind: String,
        /// Namespace of the object
        namespace: String,
        /// Name of the object
        name: String,
    },

    /// A work item key could not be decoded into namespace and name
    #[error("malformed key {key:?}: {message}")]
    MalformedKey {
        /// The raw key as it was enqueued
        key: String,
        /// Why the key was rejected
        message: String,
    },

    /// Input to a derived-resource builder was rejected
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Identity of the offending resource ("namespace/name")
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.template.metadata.labels")
        field: Option<String>,
    },

    /// Credential loading or client construction failed
    #[error("bootstrap error [{context}]: {message}")]
    Bootstrap {
        /// Context where the error occurred (e.g., "kubeconfig", "in-cluster")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Context where the error occurred (e.g., "reconciler", "feed")
        context: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a not-found error for the given object
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error for the given object
    pub fn already_exists(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a malformed-key error
    pub fn malformed_key(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedKey {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a bootstrap error with context
    pub fn bootstrap_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Bootstrap {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Only failures derived from local input are permanent: malformed keys
    /// and builder validation errors need the input to change. Every store
    /// failure is retried, including 4xx answers such as throttling (429) or
    /// missing RBAC (403).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { .. } => true,
            Error::NotFound { .. } => true,
            Error::AlreadyExists { .. } => true,
            Error::MalformedKey { .. } => false,
            Error::Validation { .. } => false,
            Error::Bootstrap { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// True if the store reported that the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True if the store rejected a create because the object exists
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }
}
