//! Cluster API seam.
//!
//! The reconciler never touches `kube::Api` directly: every read and write
//! goes through [`ClusterClient`], so the whole enforcement engine can run
//! against the in-memory fake in `test_utils`.

use crate::error::ControllerError;
use async_trait::async_trait;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// A namespaced Kubernetes object the controller can read and write.
pub trait NamespacedObject:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> NamespacedObject for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// A cluster-scoped Kubernetes object the controller only reads.
pub trait ClusterObject:
    Resource<Scope = ClusterResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> ClusterObject for K where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Typed access to the cluster API.
///
/// `get*` map a missing object to `Ok(None)`, `delete` maps it to
/// `Ok(false)`. Every other failure is classified through
/// [`ControllerError::from_kube`].
#[async_trait]
pub trait ClusterClient: Clone + Send + Sync + 'static {
    /// Fetch a namespaced object.
    async fn get<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, ControllerError>;

    /// Fetch a cluster-scoped object.
    async fn get_cluster_scoped<K: ClusterObject>(
        &self,
        name: &str,
    ) -> Result<Option<K>, ControllerError>;

    /// Create a namespaced object.
    async fn create<K: NamespacedObject>(&self, namespace: &str, obj: &K)
    -> Result<K, ControllerError>;

    /// Apply a JSON merge patch to the main resource. A
    /// `metadata.resourceVersion` carried by the patch makes it conditional.
    async fn patch_merge<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, ControllerError>;

    /// Apply a JSON merge patch to the status subresource.
    async fn patch_status<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, ControllerError>;

    /// Delete a namespaced object, returning whether it existed.
    async fn delete<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<bool, ControllerError>;
}

/// [`ClusterClient`] backed by a live `kube::Client`.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    /// Wrap an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: NamespacedObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, ControllerError> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(ControllerError::from_kube)
    }

    async fn get_cluster_scoped<K: ClusterObject>(
        &self,
        name: &str,
    ) -> Result<Option<K>, ControllerError> {
        Api::<K>::all(self.client.clone())
            .get_opt(name)
            .await
            .map_err(ControllerError::from_kube)
    }

    async fn create<K: NamespacedObject>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, ControllerError> {
        self.api::<K>(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(ControllerError::from_kube)
    }

    async fn patch_merge<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, ControllerError> {
        self.api::<K>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(ControllerError::from_kube)
    }

    async fn patch_status<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, ControllerError> {
        self.api::<K>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(ControllerError::from_kube)
    }

    async fn delete<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<bool, ControllerError> {
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(ControllerError::from_kube(e)),
        }
    }
}
