//! Workload reconciler
//!
//! Given a workload identity, decides whether its exposure Service and routing
//! Ingress should exist and converges the cluster toward that.
//!
//! The decision is re-derived on every cycle from a live (uncached) read of the
//! Deployment, never from the kind of notification that enqueued the key: by
//! the time a key is processed its event may be stale or coalesced with a later
//! one. Both directions are idempotent:
//!
//! - create: "already exists" counts as success, so a replayed or concurrent
//!   cycle moves on to the next step
//! - delete: "not found" counts as success, so teardown can be replayed
//!
//! There is no rollback. If the Service is created but the Ingress create
//! fails, the Service stays; the retry sees "already exists" for it and goes
//! straight to the Ingress.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::builder::{build_exposure, build_routing, RoutingOptions};
use crate::feed::WorkloadCache;
use crate::key::WorkloadRef;
use crate::{Error, FIELD_MANAGER};
use ekspose_common::kube_utils;

const KIND_DEPLOYMENT: &str = "Deployment";
const KIND_SERVICE: &str = "Service";
const KIND_INGRESS: &str = "Ingress";

// =============================================================================
// Traits for dependency injection and testability
// =============================================================================

/// Store operations the reconciler needs
///
/// Implementations must report a missing object as [`Error::NotFound`] and a
/// colliding create as [`Error::AlreadyExists`]; the reconciler decides what
/// those mean.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExposeKubeClient: Send + Sync {
    /// Live read of a Deployment, bypassing any cache
    async fn get_live_workload(&self, namespace: &str, name: &str) -> Result<Deployment, Error>;

    /// Create the exposure Service
    async fn create_exposure(&self, service: &Service) -> Result<(), Error>;

    /// Delete the exposure Service
    async fn delete_exposure(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Create the routing Ingress
    async fn create_routing(&self, ingress: &Ingress) -> Result<(), Error>;

    /// Delete the routing Ingress
    async fn delete_routing(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Something that can run one sync cycle for a workload
///
/// The dispatcher only depends on this, so its retry handling can be tested
/// without a reconciler.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadSyncer: Send + Sync {
    /// Converge the derived records of `workload`
    async fn sync(&self, workload: &WorkloadRef) -> Result<SyncAction, Error>;
}

/// Real Kubernetes client implementation
pub struct ExposeKubeClientImpl {
    client: Client,
}

impl ExposeKubeClientImpl {
    /// Wrap the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExposeKubeClient for ExposeKubeClientImpl {
    async fn get_live_workload(&self, namespace: &str, name: &str) -> Result<Deployment, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| kube_utils::classify(e, KIND_DEPLOYMENT, namespace, name))
    }

    async fn create_exposure(&self, service: &Service) -> Result<(), Error> {
        let namespace = service.namespace().unwrap_or_default();
        let name = service.name_any();
        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&Self::post_params(), service)
            .await
            .map_err(|e| kube_utils::classify(e, KIND_SERVICE, &namespace, &name))?;
        Ok(())
    }

    async fn delete_exposure(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| kube_utils::classify(e, KIND_SERVICE, namespace, name))?;
        Ok(())
    }

    async fn create_routing(&self, ingress: &Ingress) -> Result<(), Error> {
        let namespace = ingress.namespace().unwrap_or_default();
        let name = ingress.name_any();
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&Self::post_params(), ingress)
            .await
            .map_err(|e| kube_utils::classify(e, KIND_INGRESS, &namespace, &name))?;
        Ok(())
    }

    async fn delete_routing(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| kube_utils::classify(e, KIND_INGRESS, namespace, name))?;
        Ok(())
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Whether a create/delete step changed anything
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The store accepted the write
    Applied,
    /// The record was already in the desired state
    Unchanged,
}

/// What a sync cycle did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncAction {
    /// The workload exists; both records exist now
    Converged {
        /// Service step
        exposure: StepOutcome,
        /// Ingress step
        routing: StepOutcome,
    },
    /// The workload is gone; neither record exists now
    TornDown {
        /// Ingress step
        routing: StepOutcome,
        /// Service step
        exposure: StepOutcome,
    },
}

/// Reconciler for one watched workload kind
///
/// Holds no mutable state: concurrent calls for different keys are safe, and
/// the work queue guarantees a key is never synced twice at once.
pub struct Reconciler {
    kube: Arc<dyn ExposeKubeClient>,
    cache: Arc<dyn WorkloadCache>,
    routing: RoutingOptions,
}

impl Reconciler {
    /// Create a reconciler over the given store and cache
    pub fn new(
        kube: Arc<dyn ExposeKubeClient>,
        cache: Arc<dyn WorkloadCache>,
        routing: RoutingOptions,
    ) -> Self {
        Self {
            kube,
            cache,
            routing,
        }
    }

    /// Run one sync cycle for `workload`
    #[instrument(skip(self, workload), fields(namespace = %workload.namespace, name = %workload.name))]
    pub async fn sync(&self, workload: &WorkloadRef) -> Result<SyncAction, Error> {
        match self
            .kube
            .get_live_workload(&workload.namespace, &workload.name)
            .await
        {
            Ok(live) => self.converge(workload, live).await,
            Err(e) if e.is_not_found() => self.tear_down(workload).await,
            Err(e) => Err(e),
        }
    }

    async fn converge(&self, workload: &WorkloadRef, live: Deployment) -> Result<SyncAction, Error> {
        // The cache may lag; a miss just means it hasn't caught up with the
        // object we already read live.
        let source = match self.cache.get_cached(&workload.namespace, &workload.name) {
            Some(cached) => cached,
            None => {
                debug!("workload not in cache yet, using live object");
                Arc::new(live)
            }
        };

        let service = build_exposure(&source)?;
        let exposure = tolerate_already_exists(self.kube.create_exposure(&service).await)?;
        debug!(outcome = ?exposure, "exposure service");

        let ingress = build_routing(&service, &self.routing)?;
        let routing = tolerate_already_exists(self.kube.create_routing(&ingress).await)?;
        debug!(outcome = ?routing, "routing ingress");

        if exposure == StepOutcome::Applied || routing == StepOutcome::Applied {
            info!(?exposure, ?routing, "workload exposed");
        }
        Ok(SyncAction::Converged { exposure, routing })
    }

    async fn tear_down(&self, workload: &WorkloadRef) -> Result<SyncAction, Error> {
        // Ingress first: it references the Service
        let routing = tolerate_not_found(
            self.kube
                .delete_routing(&workload.namespace, &workload.name)
                .await,
        )?;
        let exposure = tolerate_not_found(
            self.kube
                .delete_exposure(&workload.namespace, &workload.name)
                .await,
        )?;

        if exposure == StepOutcome::Applied || routing == StepOutcome::Applied {
            info!(?exposure, ?routing, "workload gone, derived records removed");
        } else {
            debug!("workload gone, nothing to remove");
        }
        Ok(SyncAction::TornDown { routing, exposure })
    }
}

#[async_trait]
impl WorkloadSyncer for Reconciler {
    async fn sync(&self, workload: &WorkloadRef) -> Result<SyncAction, Error> {
        Reconciler::sync(self, workload).await
    }
}

fn tolerate_already_exists(result: Result<(), Error>) -> Result<StepOutcome, Error> {
    match result {
        Ok(()) => Ok(StepOutcome::Applied),
        Err(e) if e.is_already_exists() => Ok(StepOutcome::Unchanged),
        Err(e) => Err(e),
    }
}

fn tolerate_not_found(result: Result<(), Error>) -> Result<StepOutcome, Error> {
    match result {
        Ok(()) => Ok(StepOutcome::Applied),
        Err(e) if e.is_not_found() => Ok(StepOutcome::Unchanged),
        Err(e) => Err(e),
    }
}

// =============================================================================
// Tests
// =============================================================================
