//! Object identity used as the work item key.

use crate::error::InformerError;
use kube::Resource;
use kube_runtime::reflector::ObjectRef;
use std::fmt;
use std::str::FromStr;

/// Identity of a watched object: namespace (if any) plus name.
///
/// Renders as `namespace/name`, or just `name` for cluster-scoped objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced object.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object.
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Extracts the key from an object's metadata.
    ///
    /// Returns `None` if the object has no name yet (e.g. only `generateName`).
    pub fn from_resource<K: Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        let name = meta.name.as_deref().filter(|name| !name.is_empty())?;
        Some(Self {
            namespace: meta.namespace.clone().filter(|ns| !ns.is_empty()),
            name: name.to_string(),
        })
    }

    /// Reference used to look the object up in a reflector store.
    pub fn to_object_ref<K>(&self) -> ObjectRef<K>
    where
        K: Resource,
        K::DynamicType: Default,
    {
        let obj_ref = ObjectRef::new(&self.name);
        match &self.namespace {
            Some(ns) => obj_ref.within(ns),
            None => obj_ref,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = InformerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InformerError::InvalidKey(s.to_string());
        match s.split_once('/') {
            None if !s.is_empty() => Ok(Self::cluster_scoped(s)),
            None => Err(invalid()),
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::namespaced(ns, name))
            }
            Some(_) => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Namespace, Pod};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(namespace: Option<&str>, name: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: name.map(str::to_string),
                namespace: namespace.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_key_from_namespaced_pod() {
        let key = ObjectKey::from_resource(&pod(Some("default"), Some("nginx")));
        assert_eq!(key, Some(ObjectKey::namespaced("default", "nginx")));
        assert_eq!(key.map(|k| k.to_string()).as_deref(), Some("default/nginx"));
    }

    #[test]
    fn test_key_without_name_is_rejected() {
        assert_eq!(ObjectKey::from_resource(&pod(Some("default"), None)), None);
        assert_eq!(ObjectKey::from_resource(&pod(Some("default"), Some(""))), None);
    }

    #[test]
    fn test_empty_namespace_is_cluster_scoped() {
        let key = ObjectKey::from_resource(&pod(Some(""), Some("node-a")));
        assert_eq!(key, Some(ObjectKey::cluster_scoped("node-a")));
        assert_eq!(ObjectKey::cluster_scoped("node-a").to_string(), "node-a");
    }

    #[test]
    fn test_parse_round_trips_display() {
        let parsed: ObjectKey = "kube-system/coredns".parse().unwrap();
        assert_eq!(parsed, ObjectKey::namespaced("kube-system", "coredns"));

        let parsed: ObjectKey = "kube-system".parse().unwrap();
        assert_eq!(parsed, ObjectKey::cluster_scoped("kube-system"));
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        for bad in ["", "/", "ns/", "/name", "a/b/c"] {
            assert!(bad.parse::<ObjectKey>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_object_ref_matches_namespace() {
        let obj_ref = ObjectKey::namespaced("default", "nginx").to_object_ref::<Pod>();
        assert_eq!(obj_ref.name, "nginx");
        assert_eq!(obj_ref.namespace.as_deref(), Some("default"));

        let obj_ref = ObjectKey::cluster_scoped("default").to_object_ref::<Namespace>();
        assert_eq!(obj_ref.namespace, None);
    }
}
