//! Integration tests for cluster-side objects against the in-memory cluster.

use chaos_test_utils::{FakeCluster, TEST_NAMESPACE, TEST_VM_NAMESPACE, TEST_WORKER_GROUP};
use remedy_chaos::cluster::{PUBLIC_IP_ADDRESS_KIND, VIRTUAL_MACHINE_KIND};
use remedy_chaos::errors::ClusterError;
use remedy_chaos::identity::{ResourceSuffix, SERVICE_NAME_LENGTH};
use remedy_chaos::objects::{ObjectManager, REAPPLY_VM_OPERATION, SERVICE_TYPE};
use remedy_chaos::public_ip::PublicIp;
use serde_json::json;
use std::sync::Arc;

const SERVICE_FINALIZER: &str = "azure.remedy.gardener.cloud/service";
const NODE_FINALIZER: &str = "azure.remedy.gardener.cloud/node";

fn setup() -> (Arc<FakeCluster>, ObjectManager) {
    let cluster = Arc::new(FakeCluster::new());
    let objects = ObjectManager::new(cluster.clone());
    (cluster, objects)
}

fn public_ip(suffix: &str) -> PublicIp {
    PublicIp {
        name: format!("ip-{suffix}"),
        id: format!("/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/publicIPAddresses/ip-{suffix}"),
        address: Some("20.0.0.7".to_string()),
        suffix: ResourceSuffix::new(suffix),
    }
}

// ===== Services =====

#[tokio::test]
async fn test_create_services() -> Result<(), anyhow::Error> {
    let (cluster, objects) = setup();

    let names = objects.create_services(4, TEST_NAMESPACE).await?;

    assert!(!names.is_empty() && names.len() <= 4);
    for name in &names {
        assert!(name.starts_with("svc-"));
        assert_eq!(name.len(), SERVICE_NAME_LENGTH);

        let service = cluster
            .service(TEST_NAMESPACE, name)
            .expect("service was created");
        let spec = service.spec.expect("service has a spec");
        assert_eq!(spec.type_.as_deref(), Some(SERVICE_TYPE));
        assert_eq!(
            spec.selector.and_then(|s| s.get("app").cloned()),
            Some(name.clone())
        );
    }
    assert_eq!(cluster.service_names(TEST_NAMESPACE).len(), names.len());
    Ok(())
}

#[tokio::test]
async fn test_cleanup_services_scoped_to_names() -> Result<(), anyhow::Error> {
    // Arrange
    let (cluster, objects) = setup();
    cluster.seed_service(TEST_NAMESPACE, "svc-other001", &[]);
    cluster.seed_service(TEST_NAMESPACE, "kube-dns", &[]);
    let names = objects.create_services(2, TEST_NAMESPACE).await?;

    // Act
    let deleted = objects.cleanup_services(Some(&names), TEST_NAMESPACE).await?;

    // Assert
    assert_eq!(deleted, names.len());
    assert_eq!(
        cluster.service_names(TEST_NAMESPACE),
        vec!["kube-dns".to_string(), "svc-other001".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_cleanup_services_unscoped_removes_every_prefixed_service() -> Result<(), anyhow::Error>
{
    let (cluster, objects) = setup();
    cluster.seed_service(TEST_NAMESPACE, "svc-other001", &[]);
    cluster.seed_service(TEST_NAMESPACE, "kube-dns", &[]);
    cluster.seed_service("other", "svc-elsewhere", &[]);
    objects.create_services(2, TEST_NAMESPACE).await?;

    objects.cleanup_services(None, TEST_NAMESPACE).await?;

    assert_eq!(
        cluster.service_names(TEST_NAMESPACE),
        vec!["kube-dns".to_string()]
    );
    assert_eq!(
        cluster.service_names("other"),
        vec!["svc-elsewhere".to_string()],
        "Other namespaces are untouched"
    );
    Ok(())
}

// ===== Public IP custom resources =====

#[tokio::test]
async fn test_custom_resource_create_and_delete() -> Result<(), anyhow::Error> {
    let (cluster, objects) = setup();
    let ip = public_ip("abc123defg");

    objects.create_custom_resource(&ip, TEST_NAMESPACE).await?;
    assert_eq!(
        cluster.custom_object_names(&PUBLIC_IP_ADDRESS_KIND, TEST_NAMESPACE),
        vec!["pubip-ip-abc123defg".to_string()]
    );

    objects.delete_custom_resource(&ip, TEST_NAMESPACE).await?;
    assert!(cluster
        .custom_object_names(&PUBLIC_IP_ADDRESS_KIND, TEST_NAMESPACE)
        .is_empty());

    let again = objects.delete_custom_resource(&ip, TEST_NAMESPACE).await;
    assert!(matches!(again, Err(ClusterError::NotFound(_))));
    Ok(())
}

/// An address without an assigned IP cannot be mirrored; nothing is sent to
/// the cluster.
#[tokio::test]
async fn test_custom_resource_requires_an_address() {
    let (cluster, objects) = setup();
    let ip = PublicIp {
        address: None,
        ..public_ip("noaddress1")
    };

    let result = objects.create_custom_resource(&ip, TEST_NAMESPACE).await;

    assert!(matches!(result, Err(ClusterError::InvalidObject(_))));
    assert_eq!(cluster.calls().custom_object_creates, 0);
    assert!(cluster
        .custom_object_names(&PUBLIC_IP_ADDRESS_KIND, TEST_NAMESPACE)
        .is_empty());
}

#[tokio::test]
async fn test_cleanup_custom_resources_clears_finalizers_first() -> Result<(), anyhow::Error> {
    // Arrange
    let (cluster, objects) = setup();
    cluster.seed_custom_object(
        &PUBLIC_IP_ADDRESS_KIND,
        TEST_NAMESPACE,
        "pubip-ip-stuck00001",
        &["azure.remedy.gardener.cloud/publicipaddress"],
    );
    cluster.seed_custom_object(&PUBLIC_IP_ADDRESS_KIND, TEST_NAMESPACE, "pubip-ip-free000001", &[]);

    // Act
    let deleted = objects.cleanup_custom_resources(TEST_NAMESPACE).await?;

    // Assert
    assert_eq!(deleted, 2);
    assert!(cluster
        .custom_object_names(&PUBLIC_IP_ADDRESS_KIND, TEST_NAMESPACE)
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cleanup_virtual_machine_resources() -> Result<(), anyhow::Error> {
    let (cluster, objects) = setup();
    cluster.seed_custom_object(
        &VIRTUAL_MACHINE_KIND,
        TEST_VM_NAMESPACE,
        "shoot--dev--fail-me-z1-abc",
        &["azure.remedy.gardener.cloud/virtualmachine"],
    );
    cluster.seed_custom_object(&PUBLIC_IP_ADDRESS_KIND, TEST_VM_NAMESPACE, "pubip-ip-keep000001", &[]);

    let deleted = objects
        .cleanup_virtual_machine_resources(TEST_VM_NAMESPACE)
        .await?;

    assert_eq!(deleted, 1);
    assert!(cluster
        .custom_object_names(&VIRTUAL_MACHINE_KIND, TEST_VM_NAMESPACE)
        .is_empty());
    assert_eq!(
        cluster
            .custom_object_names(&PUBLIC_IP_ADDRESS_KIND, TEST_VM_NAMESPACE)
            .len(),
        1
    );
    Ok(())
}

// ===== Finalizers =====

#[tokio::test]
async fn test_cleanup_orphaned_finalizers_keeps_foreign_entries() -> Result<(), anyhow::Error> {
    // Arrange
    let (cluster, objects) = setup();
    cluster.seed_service("istio-system", "istio-ingressgateway", &[SERVICE_FINALIZER, "example.com/keep"]);
    cluster.seed_service(TEST_NAMESPACE, "kubernetes", &[]);
    cluster.seed_node("node-a", "worker", &[NODE_FINALIZER]);
    cluster.seed_node("node-b", "worker", &[]);

    // Act
    let patched = objects.cleanup_orphaned_finalizers().await?;

    // Assert
    assert_eq!(patched, 2);
    let service = cluster
        .service("istio-system", "istio-ingressgateway")
        .expect("service still exists");
    assert_eq!(
        service.metadata.finalizers,
        Some(vec!["example.com/keep".to_string()])
    );
    let node = cluster.node("node-a").expect("node still exists");
    assert_eq!(node.metadata.finalizers, Some(Vec::new()));
    Ok(())
}

#[tokio::test]
async fn test_cleanup_orphaned_finalizers_nothing_to_do() -> Result<(), anyhow::Error> {
    let (cluster, objects) = setup();
    cluster.seed_service(TEST_NAMESPACE, "kubernetes", &["example.com/keep"]);
    cluster.seed_node("node-a", "worker", &[]);

    assert_eq!(objects.cleanup_orphaned_finalizers().await?, 0);
    Ok(())
}

// ===== Nodes and virtual machines =====

#[tokio::test]
async fn test_node_names_filters_by_worker_pool() -> Result<(), anyhow::Error> {
    let (cluster, objects) = setup();
    cluster.seed_node("shoot--dev--fail-me-z1-a", TEST_WORKER_GROUP, &[]);
    cluster.seed_node("shoot--dev--fail-me-z1-b", TEST_WORKER_GROUP, &[]);
    cluster.seed_node("shoot--dev--worker-z1-a", "worker", &[]);

    let mut names = objects.node_names(TEST_WORKER_GROUP).await?;
    names.sort();

    assert_eq!(
        names,
        vec![
            "shoot--dev--fail-me-z1-a".to_string(),
            "shoot--dev--fail-me-z1-b".to_string(),
        ]
    );
    assert!(objects.node_names("missing").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_virtual_machine_failed_operations() -> Result<(), anyhow::Error> {
    let (cluster, objects) = setup();
    cluster.set_failed_operations(
        TEST_VM_NAMESPACE,
        "vm-a",
        json!([
            { "type": REAPPLY_VM_OPERATION, "attempts": 3, "errorMessage": "still failed" },
            { "type": "CleanPublicIPAddress", "attempts": 1 },
        ]),
    );

    let operations = objects
        .virtual_machine_failed_operations("vm-a", TEST_VM_NAMESPACE)
        .await?;

    assert_eq!(operations.len(), 2);
    let reapply = operations.first().expect("two operations");
    assert_eq!(reapply.operation_type, REAPPLY_VM_OPERATION);
    assert_eq!(reapply.attempts, 3);
    assert_eq!(reapply.error_message.as_deref(), Some("still failed"));
    Ok(())
}

#[tokio::test]
async fn test_virtual_machine_without_status_has_no_operations() -> Result<(), anyhow::Error> {
    let (cluster, objects) = setup();
    cluster.seed_custom_object(&VIRTUAL_MACHINE_KIND, TEST_VM_NAMESPACE, "vm-b", &[]);

    let operations = objects
        .virtual_machine_failed_operations("vm-b", TEST_VM_NAMESPACE)
        .await?;
    assert!(operations.is_empty());

    let missing = objects
        .virtual_machine_failed_operations("vm-missing", TEST_VM_NAMESPACE)
        .await;
    assert!(matches!(missing, Err(ClusterError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_malformed_failed_operations_is_invalid_object() {
    let (cluster, objects) = setup();
    cluster.set_failed_operations(TEST_VM_NAMESPACE, "vm-c", json!({ "unexpected": true }));

    let result = objects
        .virtual_machine_failed_operations("vm-c", TEST_VM_NAMESPACE)
        .await;

    assert!(matches!(result, Err(ClusterError::InvalidObject(_))));
}
