//! Work item identity
//!
//! Work items travel through the queue as composite `namespace/name` strings
//! and are decoded back into a [`WorkloadRef`] by the dispatcher.

use std::fmt;

use kube::{Resource, ResourceExt};

use crate::{Error, Result, KEY_DELIMITER};

/// Namespace + name of a watched workload
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadRef {
    /// Namespace of the workload
    pub namespace: String,
    /// Name of the workload (also the name of its derived records)
    pub name: String,
}

impl WorkloadRef {
    /// Build a ref, validating both parts
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let name = name.into();
        let key = format!("{}{}{}", namespace, KEY_DELIMITER, name);

        if namespace.is_empty() {
            return Err(Error::malformed_key(key, "namespace is empty"));
        }
        if name.is_empty() {
            return Err(Error::malformed_key(key, "name is empty"));
        }
        if namespace.contains(KEY_DELIMITER) || name.contains(KEY_DELIMITER) {
            return Err(Error::malformed_key(
                key,
                format!("namespace and name must not contain {:?}", KEY_DELIMITER),
            ));
        }
        Ok(Self { namespace, name })
    }

    /// Decode a composite `namespace/name` key
    ///
    /// Exactly one delimiter is accepted; cluster-scoped keys (no namespace)
    /// are rejected because every derived record is namespaced.
    pub fn parse(key: &str) -> Result<Self> {
        let parts: Vec<&str> = key.split(KEY_DELIMITER).collect();
        match parts.as_slice() {
            [namespace, name] => Self::new(*namespace, *name)
                .map_err(|e| match e {
                    Error::MalformedKey { message, .. } => Error::malformed_key(key, message),
                    other => other,
                }),
            [_] => Err(Error::malformed_key(key, "missing namespace delimiter")),
            _ => Err(Error::malformed_key(key, "unexpected extra delimiters")),
        }
    }

    /// Identity of a watched object, if it has both a namespace and a name
    pub fn from_resource<K: Resource>(obj: &K) -> Result<Self> {
        let namespace = obj.namespace().unwrap_or_default();
        Self::new(namespace, obj.name_any())
    }

    /// Encode as the composite queue key
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.namespace, KEY_DELIMITER, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use kube::api::ObjectMeta;

    #[test]
    fn parses_namespace_and_name() {
        let r = WorkloadRef::parse("ns/app1").unwrap();
        assert_eq!(r.namespace, "ns");
        assert_eq!(r.name, "app1");
        assert_eq!(r.key(), "ns/app1");
    }

    #[test]
    fn rejects_key_without_namespace() {
        let err = WorkloadRef::parse("app1").unwrap_err();
        assert!(matches!(err, Error::MalformedKey { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn rejects_empty_parts() {
        assert!(WorkloadRef::parse("/app1").is_err());
        assert!(WorkloadRef::parse("ns/").is_err());
        assert!(WorkloadRef::parse("").is_err());
    }

    #[test]
    fn rejects_extra_delimiters() {
        let err = WorkloadRef::parse("a/b/c").unwrap_err();
        match err {
            Error::MalformedKey { key, message } => {
                assert_eq!(key, "a/b/c");
                assert!(message.contains("extra"));
            }
            other => panic!("expected MalformedKey, got {other:?}"),
        }
    }

    #[test]
    fn malformed_key_reports_original_key() {
        match WorkloadRef::parse("ns/").unwrap_err() {
            Error::MalformedKey { key, .. } => assert_eq!(key, "ns/"),
            other => panic!("expected MalformedKey, got {other:?}"),
        }
    }

    #[test]
    fn new_rejects_delimiter_in_parts() {
        assert!(WorkloadRef::new("n/s", "app").is_err());
        assert!(WorkloadRef::new("ns", "a/pp").is_err());
    }

    #[test]
    fn from_resource_uses_metadata() {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("app1".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            WorkloadRef::from_resource(&deployment).unwrap(),
            WorkloadRef::new("ns", "app1").unwrap()
        );
    }

    #[test]
    fn from_resource_requires_namespace() {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("app1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(WorkloadRef::from_resource(&deployment).is_err());
    }
}
