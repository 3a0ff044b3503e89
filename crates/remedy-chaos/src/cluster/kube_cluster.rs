//! `kube`-backed [`ClusterApi`].

use super::{ClusterApi, CustomResourceKind};
use crate::errors::ClusterError;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use std::path::Path;
use tracing::{debug, instrument};

/// Cluster client over the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using `kubeconfig` if given, otherwise the default chain
    /// (`$KUBECONFIG`, `~/.kube/config`, in-cluster).
    #[instrument(skip_all)]
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, ClusterError> {
        let client = match kubeconfig {
            Some(path) => {
                debug!(target: "remedy_chaos.cluster", path = %path.display(), "Loading kubeconfig");
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| ClusterError::Client(format!("Failed to read kubeconfig: {e}")))?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(|e| {
                            ClusterError::Client(format!("Invalid kubeconfig: {e}"))
                        })?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };
        Ok(Self::new(client))
    }

    fn services(&self, namespace: Option<&str>) -> Api<Service> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn custom(&self, kind: &CustomResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }
}

fn finalizer_patch(finalizers: Vec<String>) -> Patch<serde_json::Value> {
    Patch::Merge(json!({ "metadata": { "finalizers": finalizers } }))
}

#[async_trait::async_trait]
impl ClusterApi for KubeCluster {
    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<(), ClusterError> {
        self.services(Some(namespace))
            .create(&PostParams::default(), service)
            .await?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.services(Some(namespace))
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn list_services(&self, namespace: Option<&str>) -> Result<Vec<Service>, ClusterError> {
        let list = self.services(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn set_service_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), ClusterError> {
        self.services(Some(namespace))
            .patch(name, &PatchParams::default(), &finalizer_patch(finalizers))
            .await?;
        Ok(())
    }

    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>, ClusterError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let params = match label_selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        };
        Ok(nodes.list(&params).await?.items)
    }

    async fn set_node_finalizers(
        &self,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), ClusterError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        nodes
            .patch(name, &PatchParams::default(), &finalizer_patch(finalizers))
            .await?;
        Ok(())
    }

    async fn create_custom_object(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<(), ClusterError> {
        self.custom(kind, namespace)
            .create(&PostParams::default(), object)
            .await?;
        Ok(())
    }

    async fn get_custom_object(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, ClusterError> {
        Ok(self.custom(kind, namespace).get(name).await?)
    }

    async fn list_custom_objects(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let list = self
            .custom(kind, namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn set_custom_object_finalizers(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), ClusterError> {
        self.custom(kind, namespace)
            .patch(name, &PatchParams::default(), &finalizer_patch(finalizers))
            .await?;
        Ok(())
    }

    async fn delete_custom_object(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.custom(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}
