//! Integration tests for the public IP manager against the in-memory network.

use chaos_test_utils::{test_scope, FakeNetwork, TEST_LOCATION};
use remedy_chaos::errors::NetworkError;
use remedy_chaos::identity::DEFAULT_SUFFIX_LENGTH;
use remedy_chaos::public_ip::PublicIpManager;
use std::collections::BTreeSet;
use std::sync::Arc;

fn manager(network: &Arc<FakeNetwork>) -> PublicIpManager {
    PublicIpManager::new(network.clone(), TEST_LOCATION)
}

#[tokio::test]
async fn test_create_assigns_fresh_prefixed_names() -> Result<(), anyhow::Error> {
    // Arrange
    let network = Arc::new(FakeNetwork::new(test_scope()));
    let ips = manager(&network);

    // Act
    let created = ips.create(3).await?;

    // Assert
    assert_eq!(created.len(), 3);
    let names: BTreeSet<&str> = created.iter().map(|ip| ip.name.as_str()).collect();
    assert_eq!(names.len(), 3, "Every address must get its own suffix");
    for ip in &created {
        assert!(ip.name.starts_with("ip-"), "Unexpected name {}", ip.name);
        assert_eq!(ip.suffix.as_str().len(), DEFAULT_SUFFIX_LENGTH);
        assert_eq!(ip.name, format!("ip-{}", ip.suffix));
        assert!(ip.address.is_some(), "Cloud-assigned address should be kept");
        assert_eq!(ip.id, test_scope().public_ip_id(&ip.name));
    }
    assert_eq!(network.public_ip_names().len(), 3);
    assert_eq!(network.calls().public_ip_creates, 3);

    Ok(())
}

#[tokio::test]
async fn test_create_zero_is_a_no_op() -> Result<(), anyhow::Error> {
    let network = Arc::new(FakeNetwork::new(test_scope()));

    let created = manager(&network).create(0).await?;

    assert!(created.is_empty());
    assert_eq!(network.calls().public_ip_creates, 0);
    Ok(())
}

#[tokio::test]
async fn test_create_failure_propagates() {
    let network = Arc::new(FakeNetwork::new(test_scope()));
    network.fail_public_ip_creates(true);

    let result = manager(&network).create(2).await;

    assert!(matches!(result, Err(NetworkError::Api { .. })));
    assert_eq!(network.calls().public_ip_creates, 1, "Batch stops at the first failure");
}

#[tokio::test]
async fn test_discover_orphans_only_matches_prefix() -> Result<(), anyhow::Error> {
    // Arrange
    let network = Arc::new(FakeNetwork::new(test_scope()));
    network.seed_public_ip("ip-leftover01");
    network.seed_public_ip("kube-apiserver-ip");
    network.seed_public_ip("shoot--remedy--chaos-nat-ip");

    // Act
    let orphans = manager(&network).discover_orphans().await?;

    // Assert
    assert_eq!(orphans.len(), 1);
    let orphan = orphans.first().expect("one orphan");
    assert_eq!(orphan.name, "ip-leftover01");
    assert_eq!(orphan.suffix.as_str(), "leftover01");
    Ok(())
}

#[tokio::test]
async fn test_cleanup_all_is_idempotent() -> Result<(), anyhow::Error> {
    // Arrange
    let network = Arc::new(FakeNetwork::new(test_scope()));
    network.seed_public_ip("ip-leftover01");
    network.seed_public_ip("ip-leftover02");
    network.seed_public_ip("kube-apiserver-ip");
    let ips = manager(&network);

    // Act
    let first = ips.cleanup_all().await?;
    let deletes_after_first = network.calls().public_ip_deletes;
    let second = ips.cleanup_all().await?;

    // Assert
    assert_eq!(first, 2);
    assert_eq!(second, 0);
    assert_eq!(
        network.calls().public_ip_deletes,
        deletes_after_first,
        "Second cleanup must not issue deletes"
    );
    assert_eq!(network.public_ip_names(), vec!["kube-apiserver-ip".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_delete_removes_address() -> Result<(), anyhow::Error> {
    let network = Arc::new(FakeNetwork::new(test_scope()));
    let ips = manager(&network);
    let created = ips.create(2).await?;

    let first = created.first().expect("created");
    ips.delete(first).await?;

    let remaining = network.public_ip_names();
    assert_eq!(remaining.len(), 1);
    assert!(!remaining.contains(&first.name));
    Ok(())
}
