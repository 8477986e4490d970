//! Mutation capability against the cluster API
//!
//! Reconcilers read from reflector stores and write through [`ObjectUpdater`],
//! never into the stores themselves. The store picks the change up from the
//! next watch event.

use super::error::ReconcileError;
use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

#[async_trait]
pub trait ObjectUpdater<K>: Send + Sync {
    /// Replace the object (metadata and spec)
    async fn update(&self, obj: &K) -> Result<(), ReconcileError>;

    /// Replace the object's status subresource
    async fn update_status(&self, obj: &K) -> Result<(), ReconcileError>;
}

/// [`ObjectUpdater`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeUpdater {
    client: kube::Client,
}

impl KubeUpdater {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api_for<K>(&self, obj: &K) -> Result<(Api<K>, String), ReconcileError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        let namespace = obj.namespace().ok_or(ReconcileError::MissingNamespace)?;
        let name = obj.meta().name.clone().ok_or(ReconcileError::MissingName)?;
        Ok((Api::namespaced(self.client.clone(), &namespace), name))
    }
}

#[async_trait]
impl<K> ObjectUpdater<K> for KubeUpdater
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn update(&self, obj: &K) -> Result<(), ReconcileError> {
        let (api, name) = self.api_for(obj)?;
        api.replace(&name, &PostParams::default(), obj).await?;
        Ok(())
    }

    async fn update_status(&self, obj: &K) -> Result<(), ReconcileError> {
        let (api, name) = self.api_for(obj)?;
        let body = serde_json::to_vec(obj).map_err(kube::Error::SerdeError)?;
        api.replace_status(&name, &PostParams::default(), body).await?;
        Ok(())
    }
}

/// In-memory updater recording every write, for tests
#[cfg(test)]
pub struct MockUpdater<K> {
    pub updates: std::sync::Mutex<Vec<K>>,
    pub status_updates: std::sync::Mutex<Vec<K>>,
    /// Fail every call with a 503 from the API server
    pub fail: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl<K: Clone> MockUpdater<K> {
    pub fn new() -> Self {
        Self {
            updates: std::sync::Mutex::new(Vec::new()),
            status_updates: std::sync::Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn updates(&self) -> Vec<K> {
        self.updates.lock().unwrap().clone()
    }

    pub fn status_updates(&self) -> Vec<K> {
        self.status_updates.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), ReconcileError> {
        if self.fail {
            return Err(ReconcileError::KubeError(kube::Error::Api(
                kube::core::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "service unavailable".to_string(),
                    reason: "ServiceUnavailable".to_string(),
                    code: 503,
                },
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl<K: Clone + Send + Sync> ObjectUpdater<K> for MockUpdater<K> {
    async fn update(&self, obj: &K) -> Result<(), ReconcileError> {
        self.check()?;
        self.updates.lock().unwrap().push(obj.clone());
        Ok(())
    }

    async fn update_status(&self, obj: &K) -> Result<(), ReconcileError> {
        self.check()?;
        self.status_updates.lock().unwrap().push(obj.clone());
        Ok(())
    }
}
