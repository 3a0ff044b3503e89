//! Fixed scopes, names and configurations for deterministic tests.

use remedy_chaos::cloud::ResourceScope;
use remedy_chaos::config::{ChaosConfig, FailedVmConfig};
use std::time::Duration;

pub const TEST_SUBSCRIPTION_ID: &str = "00000000-0000-0000-0000-000000000001";
pub const TEST_RESOURCE_GROUP: &str = "shoot--remedy--chaos";
pub const TEST_LOCATION: &str = "westeurope";

pub const TEST_NAMESPACE: &str = "default";
pub const TEST_VM_NAMESPACE: &str = "kube-system";
pub const TEST_WORKER_GROUP: &str = "fail-me";

pub fn test_scope() -> ResourceScope {
    ResourceScope::new(TEST_SUBSCRIPTION_ID, TEST_RESOURCE_GROUP, TEST_LOCATION)
}

/// A short chaos run: one minute of actors with second-scale sleeps. Meant
/// for tests running on paused time.
pub fn fast_chaos_config() -> ChaosConfig {
    ChaosConfig {
        run_duration: Duration::from_secs(60),
        svc_min_sleep: Duration::from_secs(1),
        svc_max_sleep: Duration::from_secs(5),
        min_svc_count: 1,
        max_svc_count: 3,
        orphaned_ip_min_sleep: Duration::from_secs(2),
        orphaned_ip_max_sleep: Duration::from_secs(4),
        shutdown_grace_period: Duration::from_secs(10),
        namespace: TEST_NAMESPACE.to_string(),
    }
}

pub fn fast_failed_vm_config() -> FailedVmConfig {
    FailedVmConfig {
        required_attempts: 5,
        check_interval: Duration::from_secs(1),
        run_duration: Duration::from_secs(10),
        worker_group: TEST_WORKER_GROUP.to_string(),
        namespace: TEST_VM_NAMESPACE.to_string(),
    }
}
