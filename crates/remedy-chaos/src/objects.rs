//! Cluster-side objects: churn services and custom resources mirroring
//! public IPs, plus finalizer cleanup for stuck runs.

use crate::cluster::{
    ClusterApi, CustomResourceKind, CONTROLLER_FINALIZERS, PUBLIC_IP_ADDRESS_KIND,
    VIRTUAL_MACHINE_KIND, WORKER_POOL_LABEL,
};
use crate::errors::ClusterError;
use crate::identity::{custom_resource_name, random_name, SERVICE_NAME_LENGTH, SERVICE_PREFIX};
use crate::public_ip::PublicIp;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// ===== Service shape =====

pub const SERVICE_PORT: i32 = 80;
pub const SERVICE_TARGET_PORT: i32 = 8080;
pub const SERVICE_PROTOCOL: &str = "TCP";
pub const SERVICE_TYPE: &str = "LoadBalancer";
pub const SERVICE_SESSION_AFFINITY: &str = "None";

/// Failed operation type the controller records when it reapplies a VM.
pub const REAPPLY_VM_OPERATION: &str = "ReapplyVirtualMachine";

/// One entry of a `virtualmachines` object's `status.failedOperations`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedOperation {
    #[serde(rename = "type")]
    pub operation_type: String,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// The churn service named `name`: a `LoadBalancer` service on port 80
/// forwarding to 8080, selecting `app=<name>`.
pub fn churn_service(name: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(SERVICE_TYPE.to_string()),
            ports: Some(vec![ServicePort {
                port: SERVICE_PORT,
                protocol: Some(SERVICE_PROTOCOL.to_string()),
                target_port: Some(IntOrString::Int(SERVICE_TARGET_PORT)),
                ..Default::default()
            }]),
            selector: Some(BTreeMap::from([("app".to_string(), name.to_string())])),
            session_affinity: Some(SERVICE_SESSION_AFFINITY.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The `PublicIPAddress` object mirroring `ip`. Fails if the address has
/// not been assigned yet.
pub fn public_ip_object(ip: &PublicIp, namespace: &str) -> Result<DynamicObject, ClusterError> {
    let address = ip.address.as_deref().ok_or_else(|| {
        ClusterError::InvalidObject(format!("public IP {} has no address assigned", ip.name))
    })?;
    let mut object = DynamicObject::new(
        &custom_resource_name(&ip.name),
        &PUBLIC_IP_ADDRESS_KIND.api_resource(),
    )
    .within(namespace);
    object.data = json!({
        "spec": { "ipAddress": address }
    });
    Ok(object)
}

fn finalizers_of(metadata: &ObjectMeta) -> &[String] {
    metadata.finalizers.as_deref().unwrap_or_default()
}

/// Treat "already gone" as success.
fn ignore_not_found(result: Result<(), ClusterError>) -> Result<bool, ClusterError> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Creates and cleans up cluster-side objects.
pub struct ObjectManager {
    cluster: Arc<dyn ClusterApi>,
}

impl ObjectManager {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Create `count` churn services with random `svc-` names. Name
    /// collisions collapse, so the returned set may be smaller than `count`.
    #[instrument(skip_all, fields(count = count, namespace = %namespace))]
    pub async fn create_services(
        &self,
        count: usize,
        namespace: &str,
    ) -> Result<BTreeSet<String>, ClusterError> {
        let names: BTreeSet<String> = (0..count)
            .map(|_| random_name(SERVICE_PREFIX, SERVICE_NAME_LENGTH))
            .collect();

        for name in &names {
            self.cluster
                .create_service(namespace, &churn_service(name))
                .await?;
        }

        info!(
            target: "remedy_chaos.objects",
            created = names.len(),
            namespace = %namespace,
            "Created churn services"
        );
        Ok(names)
    }

    /// Delete `svc-` services in `namespace`, restricted to `names` if given.
    /// Returns the number deleted.
    #[instrument(skip_all, fields(namespace = %namespace))]
    pub async fn cleanup_services(
        &self,
        names: Option<&BTreeSet<String>>,
        namespace: &str,
    ) -> Result<usize, ClusterError> {
        let services = self.cluster.list_services(Some(namespace)).await?;
        let mut deleted = 0;

        for service in services {
            let Some(name) = service.metadata.name else {
                continue;
            };
            if !name.starts_with(SERVICE_PREFIX) {
                continue;
            }
            if names.is_some_and(|wanted| !wanted.contains(&name)) {
                continue;
            }
            if ignore_not_found(self.cluster.delete_service(namespace, &name).await)? {
                deleted += 1;
            }
        }

        info!(
            target: "remedy_chaos.objects",
            deleted,
            namespace = %namespace,
            "Deleted churn services"
        );
        Ok(deleted)
    }

    pub async fn create_custom_resource(
        &self,
        ip: &PublicIp,
        namespace: &str,
    ) -> Result<(), ClusterError> {
        let object = public_ip_object(ip, namespace)?;
        self.cluster
            .create_custom_object(&PUBLIC_IP_ADDRESS_KIND, namespace, &object)
            .await?;
        debug!(
            target: "remedy_chaos.objects",
            ip = %ip.name,
            namespace = %namespace,
            "Created public IP custom resource"
        );
        Ok(())
    }

    pub async fn delete_custom_resource(
        &self,
        ip: &PublicIp,
        namespace: &str,
    ) -> Result<(), ClusterError> {
        self.cluster
            .delete_custom_object(
                &PUBLIC_IP_ADDRESS_KIND,
                namespace,
                &custom_resource_name(&ip.name),
            )
            .await?;
        debug!(
            target: "remedy_chaos.objects",
            ip = %ip.name,
            namespace = %namespace,
            "Deleted public IP custom resource"
        );
        Ok(())
    }

    /// Strip finalizers from every `PublicIPAddress` object in `namespace`,
    /// then delete them all. Returns the number of objects deleted.
    pub async fn cleanup_custom_resources(&self, namespace: &str) -> Result<usize, ClusterError> {
        self.cleanup_custom_kind(&PUBLIC_IP_ADDRESS_KIND, namespace)
            .await
    }

    /// Same as [`cleanup_custom_resources`](Self::cleanup_custom_resources)
    /// for `VirtualMachine` objects.
    pub async fn cleanup_virtual_machine_resources(
        &self,
        namespace: &str,
    ) -> Result<usize, ClusterError> {
        self.cleanup_custom_kind(&VIRTUAL_MACHINE_KIND, namespace)
            .await
    }

    /// Two passes: a delete against an object with finalizers only marks it,
    /// so finalizers are cleared first.
    #[instrument(skip_all, fields(plural = kind.plural, namespace = %namespace))]
    async fn cleanup_custom_kind(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
    ) -> Result<usize, ClusterError> {
        let objects = self.cluster.list_custom_objects(kind, namespace).await?;
        let names: Vec<String> = objects
            .iter()
            .filter_map(|o| o.metadata.name.clone())
            .collect();

        for object in &objects {
            let Some(name) = object.metadata.name.as_deref() else {
                continue;
            };
            if !finalizers_of(&object.metadata).is_empty() {
                ignore_not_found(
                    self.cluster
                        .set_custom_object_finalizers(kind, namespace, name, Vec::new())
                        .await,
                )?;
            }
        }

        let mut deleted = 0;
        for name in &names {
            if ignore_not_found(self.cluster.delete_custom_object(kind, namespace, name).await)? {
                deleted += 1;
            }
        }

        info!(
            target: "remedy_chaos.objects",
            kind = kind.kind,
            deleted,
            namespace = %namespace,
            "Cleaned up custom resources"
        );
        Ok(deleted)
    }

    /// Remove the controller's finalizers from services in every namespace
    /// and from nodes, keeping any other finalizers. Returns the number of
    /// objects patched.
    #[instrument(skip_all)]
    pub async fn cleanup_orphaned_finalizers(&self) -> Result<usize, ClusterError> {
        let mut patched = 0;

        for service in self.cluster.list_services(None).await? {
            let (Some(name), Some(namespace)) = (
                service.metadata.name.as_deref(),
                service.metadata.namespace.as_deref(),
            ) else {
                continue;
            };
            if let Some(kept) = without_controller_finalizers(&service.metadata) {
                ignore_not_found(
                    self.cluster
                        .set_service_finalizers(namespace, name, kept)
                        .await,
                )?;
                patched += 1;
            }
        }

        for node in self.cluster.list_nodes(None).await? {
            let Some(name) = node.metadata.name.as_deref() else {
                continue;
            };
            if let Some(kept) = without_controller_finalizers(&node.metadata) {
                ignore_not_found(self.cluster.set_node_finalizers(name, kept).await)?;
                patched += 1;
            }
        }

        info!(
            target: "remedy_chaos.objects",
            patched,
            "Removed orphaned controller finalizers"
        );
        Ok(patched)
    }

    /// Names of the nodes in worker pool `worker_group`.
    pub async fn node_names(&self, worker_group: &str) -> Result<Vec<String>, ClusterError> {
        let selector = format!("{WORKER_POOL_LABEL}={worker_group}");
        let nodes = self.cluster.list_nodes(Some(&selector)).await?;
        Ok(nodes
            .into_iter()
            .filter_map(|node| node.metadata.name)
            .collect())
    }

    /// `status.failedOperations` of the `VirtualMachine` object `name`.
    /// Missing status means no failed operations.
    pub async fn virtual_machine_failed_operations(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Vec<FailedOperation>, ClusterError> {
        let object = self
            .cluster
            .get_custom_object(&VIRTUAL_MACHINE_KIND, namespace, name)
            .await?;

        let Some(raw) = object.data.pointer("/status/failedOperations") else {
            return Ok(Vec::new());
        };
        if raw.is_null() {
            return Ok(Vec::new());
        }

        serde_json::from_value(raw.clone()).map_err(|e| {
            warn!(
                target: "remedy_chaos.objects",
                name = %name,
                error = %e,
                "Malformed failedOperations on virtual machine object"
            );
            ClusterError::InvalidObject(format!("{name}: status.failedOperations: {e}"))
        })
    }
}

/// The finalizer list with the controller's entries removed, or `None` if
/// there was nothing to remove.
fn without_controller_finalizers(metadata: &ObjectMeta) -> Option<Vec<String>> {
    let current = finalizers_of(metadata);
    if !current
        .iter()
        .any(|f| CONTROLLER_FINALIZERS.contains(&f.as_str()))
    {
        return None;
    }
    Some(
        current
            .iter()
            .filter(|f| !CONTROLLER_FINALIZERS.contains(&f.as_str()))
            .cloned()
            .collect(),
    )
}
