//! End-to-end chaos runs against the in-memory cloud and cluster.
//!
//! Every test runs on paused time, so a full run (actors, sleeps and the
//! grace period) completes instantly. The fake cluster stands in for the
//! controller where noted: deleting a public IP custom resource reclaims the
//! address and its load-balancer children.

use chaos_test_utils::{
    fast_chaos_config, test_scope, FakeCluster, FakeNetwork, NetworkAssertions, TEST_NAMESPACE,
};
use remedy_chaos::cluster::PUBLIC_IP_ADDRESS_KIND;
use remedy_chaos::config::ConfigError;
use remedy_chaos::context::ChaosContext;
use remedy_chaos::errors::{HarnessError, NetworkError};
use remedy_chaos::orchestrator::{ChaosOrchestrator, CleanupSummary, RunOutcome};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    network: Arc<FakeNetwork>,
    cluster: Arc<FakeCluster>,
    orchestrator: ChaosOrchestrator,
}

impl Harness {
    /// A harness whose cluster reclaims addresses like the controller does.
    fn remediating() -> Self {
        let network = Arc::new(FakeNetwork::new(test_scope()));
        let cluster = Arc::new(FakeCluster::with_remediation(network.clone()));
        Self::build(network, cluster)
    }

    /// A harness with no controller: nothing is ever reclaimed.
    fn unattended() -> Self {
        let network = Arc::new(FakeNetwork::new(test_scope()));
        let cluster = Arc::new(FakeCluster::new());
        Self::build(network, cluster)
    }

    fn build(network: Arc<FakeNetwork>, cluster: Arc<FakeCluster>) -> Self {
        let context = Arc::new(ChaosContext::new(
            network.clone(),
            cluster.clone(),
            test_scope(),
        ));
        Self {
            network,
            cluster,
            orchestrator: ChaosOrchestrator::new(context),
        }
    }

    fn assert_cluster_clean(&self) {
        assert!(
            self.cluster.service_names(TEST_NAMESPACE).is_empty(),
            "Leftover services"
        );
        assert!(
            self.cluster
                .custom_object_names(&PUBLIC_IP_ADDRESS_KIND, TEST_NAMESPACE)
                .is_empty(),
            "Leftover public IP custom resources"
        );
    }
}

/// With a working controller the run passes and leaves nothing behind.
#[tokio::test(start_paused = true)]
async fn test_run_passes_when_controller_reclaims() -> Result<(), anyhow::Error> {
    // Arrange
    let harness = Harness::remediating();

    // Act
    let outcome = harness.orchestrator.run(&fast_chaos_config()).await?;

    // Assert
    assert_eq!(outcome, RunOutcome::Passed);
    let calls = harness.network.calls();
    assert!(calls.public_ip_creates >= 1, "Orphaned-IP actor never ran");
    assert!(
        harness.cluster.calls().service_creates >= 1,
        "Service churn actor never ran"
    );
    harness
        .network
        .assert_no_harness_resources()
        .assert_foreign_children_intact();
    harness.assert_cluster_clean();
    Ok(())
}

/// A rejected load-balancer write releases the address immediately and the
/// run carries on.
#[tokio::test(start_paused = true)]
async fn test_run_survives_load_balancer_contention() -> Result<(), anyhow::Error> {
    // Arrange
    let harness = Harness::remediating();
    harness.network.fail_next_lb_updates(1);

    // Act
    let outcome = harness.orchestrator.run(&fast_chaos_config()).await?;

    // Assert
    assert!(outcome.passed());
    assert_eq!(
        harness.network.calls().public_ip_deletes,
        1,
        "The contended address is deleted by the harness"
    );
    harness.network.assert_no_harness_resources();
    Ok(())
}

/// When every rule write is contended no address is ever mirrored into the
/// cluster, and every address is released by the harness itself.
#[tokio::test(start_paused = true)]
async fn test_contended_addresses_get_no_custom_resource() -> Result<(), anyhow::Error> {
    // Arrange
    let harness = Harness::remediating();
    harness.network.reject_lb_updates(true);

    // Act
    let outcome = harness.orchestrator.run(&fast_chaos_config()).await?;

    // Assert
    assert!(outcome.passed());
    assert_eq!(harness.cluster.calls().custom_object_creates, 0);
    let calls = harness.network.calls();
    assert!(calls.public_ip_creates >= 1, "Orphaned-IP actor never ran");
    assert_eq!(calls.public_ip_deletes, calls.public_ip_creates);
    harness.network.assert_no_harness_resources();
    harness.assert_cluster_clean();
    Ok(())
}

/// A binding that failed after the API accepted it is rolled back, so the
/// address can be released and the run goes on.
#[tokio::test(start_paused = true)]
async fn test_run_survives_failed_load_balancer_provisioning() -> Result<(), anyhow::Error> {
    // Arrange
    let harness = Harness::remediating();
    harness.network.fail_next_lb_provisioning(1);

    // Act
    let outcome = harness.orchestrator.run(&fast_chaos_config()).await?;

    // Assert
    assert!(outcome.passed());
    assert_eq!(
        harness.network.calls().public_ip_deletes,
        1,
        "The rolled back address is deleted by the harness"
    );
    harness
        .network
        .assert_no_harness_resources()
        .assert_foreign_children_intact();
    harness.assert_cluster_clean();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_run_cleans_leftovers_before_starting() -> Result<(), anyhow::Error> {
    // Arrange
    let harness = Harness::remediating();
    harness.network.seed_public_ip("ip-leftover01");
    harness.network.seed_compound_rule("leftover01");
    harness
        .cluster
        .seed_service(TEST_NAMESPACE, "svc-leftover", &[]);

    // Act
    let outcome = harness.orchestrator.run(&fast_chaos_config()).await?;

    // Assert
    assert!(outcome.passed());
    assert!(!harness
        .network
        .public_ip_names()
        .contains(&"ip-leftover01".to_string()));
    harness.network.assert_no_harness_resources();
    harness.assert_cluster_clean();
    Ok(())
}

/// Leftovers that survive the pre-run sweep abort the run before any
/// resource is created.
#[tokio::test(start_paused = true)]
async fn test_run_aborts_when_leftovers_cannot_be_removed() -> Result<(), anyhow::Error> {
    // Arrange
    let harness = Harness::remediating();
    harness.network.seed_compound_rule("stale12345");
    harness.network.reject_lb_updates(true);

    // Act
    let result = harness.orchestrator.run(&fast_chaos_config()).await;

    // Assert
    match result {
        Err(HarnessError::Precondition(report)) => {
            assert_eq!(report.rules, vec!["lbr-stale12345".to_string()]);
        }
        other => anyhow::bail!("expected a precondition failure, got {other:?}"),
    }
    assert_eq!(harness.network.calls().public_ip_creates, 0);
    assert_eq!(harness.cluster.calls().service_creates, 0);
    Ok(())
}

/// Without a controller every bound address is left behind. The run reports
/// the leak and still cleans up after itself.
#[tokio::test(start_paused = true)]
async fn test_run_reports_leaked_addresses() -> Result<(), anyhow::Error> {
    // Arrange
    let harness = Harness::unattended();

    // Act
    let outcome = harness.orchestrator.run(&fast_chaos_config()).await?;

    // Assert
    let RunOutcome::Leaked(report) = outcome else {
        anyhow::bail!("expected a leak, got {outcome:?}");
    };
    assert!(!report.public_ips.is_empty());
    assert!(report.public_ips.iter().all(|name| name.starts_with("ip-")));
    assert!(
        report.rules.is_empty()
            && report.frontend_ip_configurations.is_empty()
            && report.probes.is_empty(),
        "The harness removes its own rules, got {report:?}"
    );
    harness
        .network
        .assert_no_harness_resources()
        .assert_foreign_children_intact();
    harness.assert_cluster_clean();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_actor_error_fails_the_run() -> Result<(), anyhow::Error> {
    let harness = Harness::remediating();
    harness.network.fail_public_ip_creates(true);

    let result = harness.orchestrator.run(&fast_chaos_config()).await;

    assert!(
        matches!(result, Err(HarnessError::Network(NetworkError::Api { .. }))),
        "got {result:?}"
    );
    harness.assert_cluster_clean();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_is_rejected_before_any_call() -> Result<(), anyhow::Error> {
    let harness = Harness::remediating();
    let mut config = fast_chaos_config();
    config.svc_min_sleep = Duration::from_secs(10);
    config.svc_max_sleep = Duration::from_secs(5);

    let result = harness.orchestrator.run(&config).await;

    assert!(matches!(
        result,
        Err(HarnessError::Config(ConfigError::InvalidRange(_)))
    ));
    assert_eq!(harness.network.calls().load_balancer_reads, 0);
    Ok(())
}

#[tokio::test]
async fn test_cleanup_sweep_is_idempotent() -> Result<(), anyhow::Error> {
    // Arrange
    let harness = Harness::unattended();
    harness.network.seed_public_ip("ip-leftover01");
    harness.network.seed_compound_rule("leftover01");
    harness
        .cluster
        .seed_service(TEST_NAMESPACE, "svc-leftover", &[]);
    harness.cluster.seed_custom_object(
        &PUBLIC_IP_ADDRESS_KIND,
        TEST_NAMESPACE,
        "pubip-ip-leftover01",
        &["azure.remedy.gardener.cloud/publicipaddress"],
    );

    // Act
    let first = harness.orchestrator.cleanup_sweep(TEST_NAMESPACE).await?;
    let second = harness.orchestrator.cleanup_sweep(TEST_NAMESPACE).await?;

    // Assert
    assert_eq!(
        first,
        CleanupSummary {
            services: 1,
            custom_resources: 1,
            load_balancer_children: 3,
            public_ips: 1,
        }
    );
    assert_eq!(second, CleanupSummary::default());
    harness
        .network
        .assert_no_harness_resources()
        .assert_foreign_children_intact();
    harness.assert_cluster_clean();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_sweep_survives_concurrent_load_balancer_write() -> Result<(), anyhow::Error> {
    // Arrange
    let harness = Harness::unattended();
    harness.network.seed_public_ip("ip-leftover01");
    harness.network.seed_compound_rule("leftover01");
    harness.network.write_after_next_reads(1);

    // Act
    let summary = harness.orchestrator.cleanup_sweep(TEST_NAMESPACE).await?;

    // Assert
    assert_eq!(summary.load_balancer_children, 3);
    assert_eq!(summary.public_ips, 1);
    harness
        .network
        .assert_no_harness_resources()
        .assert_foreign_children_intact();
    Ok(())
}
