//! Workload exposure controller for ekspose
//!
//! Keeps a Service and an Ingress alongside every watched Deployment:
//!
//! - **Feed**: watches Deployments and enqueues `namespace/name` keys
//! - **Queue**: deduplicating, rate-limited work queue
//! - **Dispatcher**: workers that drain the queue and drive the reconciler
//! - **Controller**: reconciler that creates or removes the derived records
//! - **Builder**: pure construction of the derived Service and Ingress

pub mod builder;
pub mod controller;
pub mod dispatcher;
pub mod feed;
pub mod key;
pub mod queue;

// Bridge ekspose_common items into this crate's namespace.
pub(crate) use ekspose_common::{
    Error, Result, EXPOSURE_PORT, EXPOSURE_PORT_NAME, FIELD_MANAGER, KEY_DELIMITER,
    LABEL_MANAGED_BY, LABEL_MANAGED_BY_EKSPOSE, REWRITE_TARGET_ANNOTATION,
};

pub use builder::{build_exposure, build_routing, RoutingOptions};
pub use controller::{
    ExposeKubeClient, ExposeKubeClientImpl, Reconciler, StepOutcome, SyncAction, WorkloadSyncer,
};
pub use dispatcher::Dispatcher;
pub use feed::{ChangeFeed, WorkloadCache};
pub use key::WorkloadRef;
pub use queue::WorkQueue;
