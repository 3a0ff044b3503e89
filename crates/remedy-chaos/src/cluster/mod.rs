//! Cluster API seam.
//!
//! [`ObjectManager`](crate::objects::ObjectManager) only talks to
//! [`ClusterApi`]. Production uses [`kube_cluster::KubeCluster`]; tests use an
//! in-memory fake.

pub mod kube_cluster;

use crate::errors::ClusterError;
use kube::api::{ApiResource, DynamicObject};
use k8s_openapi::api::core::v1::{Node, Service};

/// API group of the controller's custom resources.
pub const REMEDY_API_GROUP: &str = "azure.remedy.gardener.cloud";

/// API version of the controller's custom resources.
pub const REMEDY_API_VERSION: &str = "v1alpha1";

/// Finalizers the controller places on services and nodes.
pub const CONTROLLER_FINALIZERS: &[&str] = &[
    "azure.remedy.gardener.cloud/service",
    "azure.remedy.gardener.cloud/node",
];

/// Label carrying the worker pool a node belongs to.
pub const WORKER_POOL_LABEL: &str = "worker.gardener.cloud/pool";

/// A namespaced custom resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomResourceKind {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

/// `publicipaddresses.azure.remedy.gardener.cloud`
pub const PUBLIC_IP_ADDRESS_KIND: CustomResourceKind = CustomResourceKind {
    group: REMEDY_API_GROUP,
    version: REMEDY_API_VERSION,
    kind: "PublicIPAddress",
    plural: "publicipaddresses",
};

/// `virtualmachines.azure.remedy.gardener.cloud`
pub const VIRTUAL_MACHINE_KIND: CustomResourceKind = CustomResourceKind {
    group: REMEDY_API_GROUP,
    version: REMEDY_API_VERSION,
    kind: "VirtualMachine",
    plural: "virtualmachines",
};

impl CustomResourceKind {
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.to_string(),
            version: self.version.to_string(),
            api_version: self.api_version(),
            kind: self.kind.to_string(),
            plural: self.plural.to_string(),
        }
    }
}

/// Cluster operations used by the harness.
///
/// Deleting an object that still carries finalizers only marks it for
/// deletion; it disappears once its finalizers are cleared.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    async fn create_service(&self, namespace: &str, service: &Service)
        -> Result<(), ClusterError>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Services in `namespace`, or in every namespace for `None`.
    async fn list_services(&self, namespace: Option<&str>) -> Result<Vec<Service>, ClusterError>;

    async fn set_service_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), ClusterError>;

    /// Nodes, optionally filtered by a label selector.
    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>, ClusterError>;

    async fn set_node_finalizers(
        &self,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), ClusterError>;

    async fn create_custom_object(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<(), ClusterError>;

    async fn get_custom_object(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, ClusterError>;

    async fn list_custom_objects(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError>;

    async fn set_custom_object_finalizers(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), ClusterError>;

    async fn delete_custom_object(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError>;
}
