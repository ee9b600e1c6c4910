use super::{
    error::{Result, WorkloadClientError},
    K8S_NODE_KIND, K8S_POD_KIND,
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, EvictParams, ListParams};
use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

#[cfg(any(feature = "mockall", test))]
use mockall::{mock, predicate::*};

#[async_trait]
/// The operations the drainer performs against a workload cluster. This is provided as a trait
/// in order to allow mocks to be used for testing purposes.
///
/// Errors are sorted into `WorkloadClientError` kinds so that callers can tell a missing object or an unreachable
/// cluster apart from other failures.
pub trait WorkloadClusterClient: Send + Sync {
    async fn get_node(&self, node_name: &str) -> Result<Node>;
    /// Marks the given node as unschedulable, preventing Pods from being deployed onto it.
    async fn cordon_node(&self, node_name: &str) -> Result<()>;
    async fn delete_node(&self, node_name: &str) -> Result<()>;
    /// Lists the Pods in all namespaces which are assigned to the given node.
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;
    /// Creates an eviction for the Pod. Evictions respect PodDisruptionBudgets.
    async fn evict_pod(&self, namespace: &str, name: &str, grace_period: Duration) -> Result<()>;
    /// Deletes the Pod outright, bypassing any PodDisruptionBudget.
    async fn delete_pod(&self, namespace: &str, name: &str, grace_period: Duration) -> Result<()>;
}

#[cfg(any(feature = "mockall", test))]
mock! {
    /// A Mock WorkloadClusterClient for use in tests.
    pub WorkloadClusterClient {}
    #[async_trait]
    impl WorkloadClusterClient for WorkloadClusterClient {
        async fn get_node(&self, node_name: &str) -> Result<Node>;
        async fn cordon_node(&self, node_name: &str) -> Result<()>;
        async fn delete_node(&self, node_name: &str) -> Result<()>;
        async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;
        async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;
        async fn evict_pod(&self, namespace: &str, name: &str, grace_period: Duration) -> Result<()>;
        async fn delete_pod(&self, namespace: &str, name: &str, grace_period: Duration) -> Result<()>;
    }
}

#[async_trait]
impl<T> WorkloadClusterClient for Arc<T>
where
    T: WorkloadClusterClient + ?Sized,
{
    async fn get_node(&self, node_name: &str) -> Result<Node> {
        (**self).get_node(node_name).await
    }

    async fn cordon_node(&self, node_name: &str) -> Result<()> {
        (**self).cordon_node(node_name).await
    }

    async fn delete_node(&self, node_name: &str) -> Result<()> {
        (**self).delete_node(node_name).await
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        (**self).list_pods_on_node(node_name).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        (**self).get_pod(namespace, name).await
    }

    async fn evict_pod(&self, namespace: &str, name: &str, grace_period: Duration) -> Result<()> {
        (**self).evict_pod(namespace, name, grace_period).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str, grace_period: Duration) -> Result<()> {
        (**self).delete_pod(namespace, name, grace_period).await
    }
}

#[derive(Clone)]
/// Concrete implementation of the `WorkloadClusterClient` trait, backed by a `kube::Client` for the workload cluster.
pub struct K8SWorkloadClusterClient {
    k8s_client: kube::client::Client,
}

impl K8SWorkloadClusterClient {
    pub fn new(k8s_client: kube::client::Client) -> Self {
        K8SWorkloadClusterClient { k8s_client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.k8s_client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.k8s_client.clone(), namespace)
    }
}

fn delete_params(grace_period: Duration) -> DeleteParams {
    DeleteParams {
        grace_period_seconds: Some(u32::try_from(grace_period.as_secs()).unwrap_or(u32::MAX)),
        ..Default::default()
    }
}

#[async_trait]
impl WorkloadClusterClient for K8SWorkloadClusterClient {
    #[instrument(skip(self), err)]
    async fn get_node(&self, node_name: &str) -> Result<Node> {
        self.nodes().get(node_name).await.map_err(|err| {
            WorkloadClientError::from_kube(err, K8S_NODE_KIND, node_name, "get Node")
        })
    }

    #[instrument(skip(self), err)]
    async fn cordon_node(&self, node_name: &str) -> Result<()> {
        self.nodes().cordon(node_name).await.map_err(|err| {
            WorkloadClientError::from_kube(err, K8S_NODE_KIND, node_name, "cordon Node")
        })?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_node(&self, node_name: &str) -> Result<()> {
        self.nodes()
            .delete(node_name, &DeleteParams::default())
            .await
            .map_err(|err| {
                WorkloadClientError::from_kube(err, K8S_NODE_KIND, node_name, "delete Node")
            })?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::all(self.k8s_client.clone());
        let node_pods = pods
            .list(&ListParams::default().fields(&format!("spec.nodeName={}", node_name)))
            .await
            .map_err(|err| {
                WorkloadClientError::from_kube(err, K8S_NODE_KIND, node_name, "list Pods on Node")
            })?;
        Ok(node_pods.items)
    }

    #[instrument(skip(self), err)]
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.pods(namespace)
            .get(name)
            .await
            .map_err(|err| WorkloadClientError::from_kube(err, K8S_POD_KIND, name, "get Pod"))
    }

    #[instrument(skip(self), err)]
    async fn evict_pod(&self, namespace: &str, name: &str, grace_period: Duration) -> Result<()> {
        let params = EvictParams {
            delete_options: Some(delete_params(grace_period)),
            ..Default::default()
        };
        self.pods(namespace)
            .evict(name, &params)
            .await
            .map_err(|err| WorkloadClientError::from_eviction(err, name, "evict Pod"))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_pod(&self, namespace: &str, name: &str, grace_period: Duration) -> Result<()> {
        self.pods(namespace)
            .delete(name, &delete_params(grace_period))
            .await
            .map_err(|err| WorkloadClientError::from_kube(err, K8S_POD_KIND, name, "delete Pod"))?;
        Ok(())
    }
}
