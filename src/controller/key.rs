//! Work queue keys
//!
//! A key is the `namespace/name` pair of one reconcilable object. Keys are
//! queued per [`ResourceKind`], so the kind never has to travel with the key.

use kube::runtime::reflector::ObjectRef;
use kube::{Resource, ResourceExt};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Resource kinds that own a work queue and worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Rollout,
    Experiment,
    Service,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Rollout => "rollout",
            ResourceKind::Experiment => "experiment",
            ResourceKind::Service => "service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace-qualified object identity, rendered as `namespace/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid object key '{0}': expected namespace/name")]
pub struct InvalidKey(pub String);

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced object; cluster-scoped objects get an empty namespace
    pub fn from_obj<K: Resource>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }

    /// Reference used to look the object up in a reflector store
    pub fn object_ref<K>(&self) -> ObjectRef<K>
    where
        K: Resource<DynamicType = ()>,
    {
        ObjectRef::new(&self.name).within(&self.namespace)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name)) if !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(InvalidKey(s.to_string())),
        }
    }
}
