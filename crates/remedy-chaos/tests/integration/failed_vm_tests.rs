//! Integration tests for the failed-VM remediation check.
//!
//! Runs on paused time: the polling loop sleeps through the whole observation
//! window without slowing the test down.

use chaos_test_utils::{
    fast_failed_vm_config, FakeCluster, FakeVmSimulator, TEST_VM_NAMESPACE, TEST_WORKER_GROUP,
};
use remedy_chaos::errors::{ClusterError, HarnessError};
use remedy_chaos::failed_vm::FailedVmCheck;
use remedy_chaos::objects::{ObjectManager, REAPPLY_VM_OPERATION};
use serde_json::json;
use std::sync::Arc;

const VM_NAME: &str = "shoot--dev--fail-me-z1-5d8f7-abcde";

fn setup(attempts: Option<u32>) -> (Arc<FakeCluster>, Arc<FakeVmSimulator>, FailedVmCheck) {
    let cluster = Arc::new(FakeCluster::new());
    let simulator = Arc::new(FakeVmSimulator::new(
        cluster.clone(),
        TEST_VM_NAMESPACE,
        attempts,
    ));
    let check = FailedVmCheck::new(ObjectManager::new(cluster.clone()), simulator.clone());
    (cluster, simulator, check)
}

#[tokio::test(start_paused = true)]
async fn test_passes_with_required_attempts() -> Result<(), anyhow::Error> {
    // Arrange
    let (cluster, simulator, check) = setup(Some(5));
    cluster.seed_node(VM_NAME, TEST_WORKER_GROUP, &[]);
    cluster.seed_node("shoot--dev--worker-z1-a", "worker", &[]);

    // Act
    let passed = check.run(&fast_failed_vm_config()).await?;

    // Assert
    assert!(passed);
    assert_eq!(simulator.started(), vec![VM_NAME.to_string()]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_fails_with_wrong_attempt_count() -> Result<(), anyhow::Error> {
    let (cluster, _simulator, check) = setup(Some(3));
    cluster.seed_node(VM_NAME, TEST_WORKER_GROUP, &[]);

    let passed = check.run(&fast_failed_vm_config()).await?;

    assert!(!passed);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_empty_worker_group_fails_without_simulating() -> Result<(), anyhow::Error> {
    let (cluster, simulator, check) = setup(Some(5));
    cluster.seed_node("shoot--dev--worker-z1-a", "worker", &[]);

    let passed = check.run(&fast_failed_vm_config()).await?;

    assert!(!passed);
    assert!(simulator.started().is_empty());
    Ok(())
}

/// The controller never creates the VM object: polling tolerates its
/// absence and the check fails at the deadline.
#[tokio::test(start_paused = true)]
async fn test_missing_virtual_machine_object_fails() -> Result<(), anyhow::Error> {
    let (cluster, simulator, check) = setup(None);
    cluster.seed_node(VM_NAME, TEST_WORKER_GROUP, &[]);

    let passed = check.run(&fast_failed_vm_config()).await?;

    assert!(!passed);
    assert_eq!(simulator.started().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_reapply_operations_is_an_error() {
    let (cluster, _simulator, check) = setup(None);
    cluster.seed_node(VM_NAME, TEST_WORKER_GROUP, &[]);
    cluster.set_failed_operations(
        TEST_VM_NAMESPACE,
        VM_NAME,
        json!([
            { "type": REAPPLY_VM_OPERATION, "attempts": 5 },
            { "type": REAPPLY_VM_OPERATION, "attempts": 2 },
        ]),
    );

    let result = check.run(&fast_failed_vm_config()).await;

    assert!(matches!(
        result,
        Err(HarnessError::Cluster(ClusterError::InvalidObject(_)))
    ));
}
