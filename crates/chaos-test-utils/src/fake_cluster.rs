//! In-memory [`ClusterApi`] with finalizer semantics.
//!
//! Deleting an object that still has finalizers only marks it; it is removed
//! once a patch clears its finalizers. Optionally, deleting a
//! `PublicIPAddress` object reclaims the matching address in a
//! [`FakeNetwork`], standing in for the controller.

use crate::fake_network::FakeNetwork;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use remedy_chaos::cluster::{
    ClusterApi, CustomResourceKind, PUBLIC_IP_ADDRESS_KIND, VIRTUAL_MACHINE_KIND,
    WORKER_POOL_LABEL,
};
use remedy_chaos::errors::ClusterError;
use remedy_chaos::identity::CUSTOM_RESOURCE_PREFIX;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

type NamespacedKey = (String, String);
type CustomKey = (&'static str, String, String);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClusterCalls {
    pub service_creates: usize,
    pub service_deletes: usize,
    pub custom_object_creates: usize,
    pub custom_object_deletes: usize,
}

#[derive(Default)]
struct ClusterState {
    services: BTreeMap<NamespacedKey, Service>,
    nodes: BTreeMap<String, Node>,
    custom_objects: BTreeMap<CustomKey, DynamicObject>,
    /// Objects deleted while they still had finalizers.
    terminating: BTreeSet<String>,
    calls: ClusterCalls,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
    remediation: Option<Arc<FakeNetwork>>,
}

fn not_found(what: &str) -> ClusterError {
    ClusterError::NotFound(format!("{what} not found"))
}

fn finalizers(metadata: &ObjectMeta) -> bool {
    metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty())
}

fn terminating_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reclaim the matching address in `network` whenever a
    /// `PublicIPAddress` object is removed.
    pub fn with_remediation(network: Arc<FakeNetwork>) -> Self {
        Self {
            state: Mutex::default(),
            remediation: Some(network),
        }
    }

    // ===== Seeding =====

    pub fn seed_node(&self, name: &str, pool: &str, finalizers: &[&str]) {
        let node = Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    WORKER_POOL_LABEL.to_string(),
                    pool.to_string(),
                )])),
                finalizers: Some(finalizers.iter().map(ToString::to_string).collect()),
                ..Default::default()
            },
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(name.to_string(), node);
    }

    pub fn seed_service(&self, namespace: &str, name: &str, finalizers: &[&str]) {
        let service = Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                finalizers: Some(finalizers.iter().map(ToString::to_string).collect()),
                ..Default::default()
            },
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .services
            .insert((namespace.to_string(), name.to_string()), service);
    }

    pub fn seed_custom_object(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        name: &str,
        finalizers: &[&str],
    ) {
        let mut object = DynamicObject::new(name, &kind.api_resource()).within(namespace);
        object.metadata.finalizers = Some(finalizers.iter().map(ToString::to_string).collect());
        self.state.lock().unwrap().custom_objects.insert(
            (kind.plural, namespace.to_string(), name.to_string()),
            object,
        );
    }

    /// Create or replace the `VirtualMachine` object `name` with the given
    /// `status.failedOperations`.
    pub fn set_failed_operations(&self, namespace: &str, name: &str, operations: Value) {
        let mut object =
            DynamicObject::new(name, &VIRTUAL_MACHINE_KIND.api_resource()).within(namespace);
        object.data = json!({ "status": { "failedOperations": operations } });
        self.state.lock().unwrap().custom_objects.insert(
            (VIRTUAL_MACHINE_KIND.plural, namespace.to_string(), name.to_string()),
            object,
        );
    }

    // ===== Inspection =====

    pub fn service_names(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .services
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state
            .lock()
            .unwrap()
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn node(&self, name: &str) -> Option<Node> {
        self.state.lock().unwrap().nodes.get(name).cloned()
    }

    pub fn custom_object_names(&self, kind: &CustomResourceKind, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .custom_objects
            .keys()
            .filter(|(plural, ns, _)| *plural == kind.plural && ns == namespace)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    pub fn calls(&self) -> ClusterCalls {
        self.state.lock().unwrap().calls
    }

    fn removed_custom_object(&self, kind: &CustomResourceKind, name: &str) {
        if kind.plural != PUBLIC_IP_ADDRESS_KIND.plural {
            return;
        }
        if let (Some(network), Some(ip_name)) = (
            &self.remediation,
            name.strip_prefix(CUSTOM_RESOURCE_PREFIX),
        ) {
            network.reclaim_public_ip(ip_name);
        }
    }
}

#[async_trait::async_trait]
impl ClusterApi for FakeCluster {
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), ClusterError> {
        let name = service.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        state.calls.service_creates += 1;

        let key = (namespace.to_string(), name.clone());
        if state.services.contains_key(&key) {
            return Err(ClusterError::Api {
                code: 409,
                message: format!("services \"{name}\" already exists"),
            });
        }
        let mut stored = service.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        state.services.insert(key, stored);
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.calls.service_deletes += 1;

        let key = (namespace.to_string(), name.to_string());
        let Some(service) = state.services.get(&key) else {
            return Err(not_found(name));
        };
        if finalizers(&service.metadata) {
            state
                .terminating
                .insert(terminating_key("services", namespace, name));
        } else {
            state.services.remove(&key);
        }
        Ok(())
    }

    async fn list_services(&self, namespace: Option<&str>) -> Result<Vec<Service>, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .services
            .iter()
            .filter(|((ns, _), _)| namespace.map_or(true, |wanted| wanted == ns))
            .map(|(_, service)| service.clone())
            .collect())
    }

    async fn set_service_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        let empty = finalizers.is_empty();
        let Some(service) = state.services.get_mut(&key) else {
            return Err(not_found(name));
        };
        service.metadata.finalizers = Some(finalizers);

        let marker = terminating_key("services", namespace, name);
        if empty && state.terminating.remove(&marker) {
            state.services.remove(&key);
        }
        Ok(())
    }

    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>, ClusterError> {
        let wanted = label_selector.and_then(|s| s.split_once('='));
        Ok(self
            .state
            .lock()
            .unwrap()
            .nodes
            .values()
            .filter(|node| match wanted {
                None => true,
                Some((key, value)) => node
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(key))
                    .is_some_and(|v| v == value),
            })
            .cloned()
            .collect())
    }

    async fn set_node_finalizers(
        &self,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        let Some(node) = state.nodes.get_mut(name) else {
            return Err(not_found(name));
        };
        node.metadata.finalizers = Some(finalizers);
        Ok(())
    }

    async fn create_custom_object(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<(), ClusterError> {
        let name = object.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        state.calls.custom_object_creates += 1;

        let key = (kind.plural, namespace.to_string(), name.clone());
        if state.custom_objects.contains_key(&key) {
            return Err(ClusterError::Api {
                code: 409,
                message: format!("{} \"{name}\" already exists", kind.plural),
            });
        }
        let mut stored = object.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        state.custom_objects.insert(key, stored);
        Ok(())
    }

    async fn get_custom_object(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, ClusterError> {
        self.state
            .lock()
            .unwrap()
            .custom_objects
            .get(&(kind.plural, namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn list_custom_objects(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .custom_objects
            .iter()
            .filter(|((plural, ns, _), _)| *plural == kind.plural && ns == namespace)
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn set_custom_object_finalizers(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), ClusterError> {
        let removed = {
            let mut state = self.state.lock().unwrap();
            let key = (kind.plural, namespace.to_string(), name.to_string());
            let empty = finalizers.is_empty();
            let Some(object) = state.custom_objects.get_mut(&key) else {
                return Err(not_found(name));
            };
            object.metadata.finalizers = Some(finalizers);

            let marker = terminating_key(kind.plural, namespace, name);
            let removed = empty && state.terminating.remove(&marker);
            if removed {
                state.custom_objects.remove(&key);
            }
            removed
        };
        if removed {
            self.removed_custom_object(kind, name);
        }
        Ok(())
    }

    async fn delete_custom_object(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        let removed = {
            let mut state = self.state.lock().unwrap();
            state.calls.custom_object_deletes += 1;

            let key = (kind.plural, namespace.to_string(), name.to_string());
            let Some(object) = state.custom_objects.get(&key) else {
                return Err(not_found(name));
            };
            if finalizers(&object.metadata) {
                state
                    .terminating
                    .insert(terminating_key(kind.plural, namespace, name));
                false
            } else {
                state.custom_objects.remove(&key);
                true
            }
        };
        if removed {
            self.removed_custom_object(kind, name);
        }
        Ok(())
    }
}
