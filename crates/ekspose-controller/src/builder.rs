//! Derived-resource builder
//!
//! Pure functions computing the desired exposure Service and routing Ingress
//! for a Deployment. Nothing here talks to the API server.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::{
    Error, Result, EXPOSURE_PORT, EXPOSURE_PORT_NAME, LABEL_MANAGED_BY, LABEL_MANAGED_BY_EKSPOSE,
    REWRITE_TARGET_ANNOTATION,
};

/// Path type of the single routing rule
const PATH_TYPE_PREFIX: &str = "Prefix";

/// Options that shape the routing record
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingOptions {
    /// `spec.ingressClassName`, if the cluster needs one
    pub ingress_class: Option<String>,
}

/// Desired Service for a Deployment
///
/// Same namespace and name as the Deployment, selecting its pod template
/// labels, with one `http` port on 80. A Deployment without template labels
/// is rejected: an empty selector would leave the Service bound to nothing
/// the Deployment owns.
pub fn build_exposure(workload: &Deployment) -> Result<Service> {
    let (namespace, name) = identity(workload)?;
    let resource = format!("{}/{}", namespace, name);

    let selector = workload
        .spec
        .as_ref()
        .and_then(|spec| spec.template.metadata.as_ref())
        .and_then(|meta| meta.labels.clone())
        .unwrap_or_default();
    if selector.is_empty() {
        return Err(Error::validation_for_field(
            resource,
            "spec.template.metadata.labels",
            "workload has no template labels, exposure selector would be empty",
        ));
    }

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some(EXPOSURE_PORT_NAME.to_string()),
                port: EXPOSURE_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Desired Ingress routing `/<name>` to an exposure Service
///
/// Same namespace and name as the Service. The rewrite annotation strips the
/// prefix before the request reaches the backend.
pub fn build_routing(exposure: &Service, options: &RoutingOptions) -> Result<Ingress> {
    let (namespace, name) = identity(exposure)?;

    let mut annotations = BTreeMap::new();
    annotations.insert(REWRITE_TARGET_ANNOTATION.to_string(), "/".to_string());

    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: name.clone(),
            port: Some(ServiceBackendPort {
                number: Some(EXPOSURE_PORT),
                ..Default::default()
            }),
        }),
        ..Default::default()
    };

    Ok(Ingress {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace),
            labels: Some(managed_labels()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: options.ingress_class.clone(),
            rules: Some(vec![IngressRule {
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(format!("/{}", name)),
                        path_type: PATH_TYPE_PREFIX.to_string(),
                        backend,
                    }],
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Namespace and name of a source object, both required
fn identity<K: Resource>(obj: &K) -> Result<(String, String)> {
    let name = obj.meta().name.clone().unwrap_or_default();
    let namespace = obj.namespace().unwrap_or_default();
    if name.is_empty() {
        return Err(Error::validation_for_field(
            format!("{}/<unnamed>", namespace),
            "metadata.name",
            "name is empty",
        ));
    }
    if namespace.is_empty() {
        return Err(Error::validation_for_field(
            name,
            "metadata.namespace",
            "namespace is empty",
        ));
    }
    Ok((namespace, name))
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        LABEL_MANAGED_BY.to_string(),
        LABEL_MANAGED_BY_EKSPOSE.to_string(),
    )])
}
