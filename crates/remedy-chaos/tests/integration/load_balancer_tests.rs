//! Integration tests for compound-rule management against the in-memory
//! network.
//!
//! The fake load balancer enforces etag preconditions, so these tests also
//! cover the read-modify-write behavior of every mutation.

use chaos_test_utils::{test_scope, FakeNetwork, NetworkAssertions, TEST_LOCATION};
use remedy_chaos::cloud::ResourceScope;
use remedy_chaos::errors::{HarnessError, NetworkError};
use remedy_chaos::load_balancer::{
    LoadBalancerManager, RuleBinding, RULE_PORT_RANGE, WRITE_ATTEMPTS,
};
use remedy_chaos::public_ip::{PublicIp, PublicIpManager};
use std::sync::Arc;

struct Fixture {
    network: Arc<FakeNetwork>,
    ips: PublicIpManager,
    lb: LoadBalancerManager,
}

fn fixture() -> Fixture {
    let network = Arc::new(FakeNetwork::new(test_scope()));
    Fixture {
        ips: PublicIpManager::new(network.clone(), TEST_LOCATION),
        lb: LoadBalancerManager::new(network.clone(), test_scope()),
        network,
    }
}

fn children_with_suffix(network: &FakeNetwork, ip: &PublicIp) -> Vec<String> {
    let suffix = ip.suffix.as_str();
    let mut names = network.harness_children();
    names.retain(|name| name.ends_with(suffix));
    names.sort();
    names
}

#[tokio::test]
async fn test_add_rules_binds_one_triple_per_ip() -> Result<(), anyhow::Error> {
    // Arrange
    let f = fixture();
    let created = f.ips.create(1).await?;
    let ip = created.first().expect("created one ip");

    // Act
    let binding = f.lb.add_rules(&created).await?;

    // Assert
    assert_eq!(binding, RuleBinding::Bound);
    let suffix = ip.suffix.as_str();
    assert_eq!(
        children_with_suffix(&f.network, ip),
        vec![
            format!("fip-{suffix}"),
            format!("lbr-{suffix}"),
            format!("prb-{suffix}"),
        ]
    );

    let lb = f.network.load_balancer();
    let frontend = lb
        .properties
        .frontend_ip_configurations
        .iter()
        .find(|fip| fip.name == format!("fip-{suffix}"))
        .expect("frontend configuration written");
    assert_eq!(
        frontend
            .properties
            .public_ip_address
            .as_ref()
            .map(|r| r.id.as_str()),
        Some(ip.id.as_str()),
        "Frontend must reference the public IP"
    );

    let rule = lb
        .properties
        .load_balancing_rules
        .iter()
        .find(|r| r.name == format!("lbr-{suffix}"))
        .expect("rule written");
    let port = rule.properties.frontend_port.expect("rule port set");
    assert!(RULE_PORT_RANGE.contains(&port), "Port {port} out of range");
    assert_eq!(rule.properties.backend_port, Some(port));

    f.network.assert_foreign_children_intact();
    Ok(())
}

#[tokio::test]
async fn test_add_rules_for_several_ips_is_one_write() -> Result<(), anyhow::Error> {
    let f = fixture();
    let created = f.ips.create(3).await?;
    let writes_before = f.network.calls().load_balancer_writes;

    let binding = f.lb.add_rules(&created).await?;

    assert!(binding.is_bound());
    assert_eq!(f.network.calls().load_balancer_writes, writes_before + 1);
    assert_eq!(f.network.harness_children().len(), 9);
    Ok(())
}

#[tokio::test]
async fn test_add_rules_with_no_ips_still_writes() -> Result<(), anyhow::Error> {
    let f = fixture();

    let binding = f.lb.add_rules(&[]).await?;

    assert_eq!(binding, RuleBinding::Bound);
    assert_eq!(f.network.calls().load_balancer_reads, 1);
    assert_eq!(f.network.calls().load_balancer_writes, 1);
    assert!(f.network.harness_children().is_empty());
    Ok(())
}

/// A rejected write is a routine outcome: the caller gets `Contended` and
/// the aggregate stays exactly as it was.
#[tokio::test]
async fn test_add_rules_contention_leaves_load_balancer_unchanged() -> Result<(), anyhow::Error> {
    // Arrange
    let f = fixture();
    let created = f.ips.create(1).await?;
    let before = f.network.load_balancer();
    f.network.fail_next_lb_updates(1);

    // Act
    let binding = f.lb.add_rules(&created).await?;

    // Assert
    assert!(
        matches!(binding, RuleBinding::Contended { .. }),
        "Expected contention, got {binding:?}"
    );
    assert_eq!(f.network.load_balancer(), before);

    // The address is still unbound, so it can be released.
    let ip = created.first().expect("created one ip");
    f.ips.delete(ip).await?;
    assert!(f.network.public_ip_names().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_rules_only_removes_matching_suffix() -> Result<(), anyhow::Error> {
    // Arrange
    let f = fixture();
    let created = f.ips.create(2).await?;
    f.lb.add_rules(&created).await?;
    let (first, second) = match created.as_slice() {
        [first, second] => (first, second),
        other => anyhow::bail!("expected two ips, got {}", other.len()),
    };

    // Act
    f.lb.delete_rules(std::slice::from_ref(first)).await?;

    // Assert
    assert!(children_with_suffix(&f.network, first).is_empty());
    assert_eq!(children_with_suffix(&f.network, second).len(), 3);
    f.network.assert_foreign_children_intact();
    Ok(())
}

#[tokio::test]
async fn test_delete_rules_then_delete_ip() -> Result<(), anyhow::Error> {
    let f = fixture();
    let created = f.ips.create(1).await?;
    f.lb.add_rules(&created).await?;
    let ip = created.first().expect("created one ip");

    // Still referenced by its frontend configuration.
    assert!(f.ips.delete(ip).await.is_err());

    f.lb.delete_rules(&created).await?;
    f.ips.delete(ip).await?;

    f.network.assert_no_harness_resources();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_delete_rules_gives_up_after_bounded_attempts() -> Result<(), anyhow::Error> {
    let f = fixture();
    let created = f.ips.create(1).await?;
    f.lb.add_rules(&created).await?;
    let writes_before = f.network.calls().load_balancer_writes;
    f.network.reject_lb_updates(true);

    let result = f.lb.delete_rules(&created).await;

    assert!(matches!(result, Err(NetworkError::Conflict(_))));
    assert_eq!(
        f.network.calls().load_balancer_writes,
        writes_before + WRITE_ATTEMPTS as usize
    );
    Ok(())
}

/// Another writer updating the load balancer between our read and our write
/// costs one extra round trip, not the run.
#[tokio::test(start_paused = true)]
async fn test_delete_rules_retries_after_concurrent_write() -> Result<(), anyhow::Error> {
    // Arrange
    let f = fixture();
    let created = f.ips.create(1).await?;
    f.lb.add_rules(&created).await?;
    let before = f.network.calls();
    f.network.write_after_next_reads(1);

    // Act
    f.lb.delete_rules(&created).await?;

    // Assert
    let ip = created.first().expect("created one ip");
    assert!(children_with_suffix(&f.network, ip).is_empty());
    let after = f.network.calls();
    assert_eq!(after.load_balancer_reads, before.load_balancer_reads + 2);
    assert_eq!(after.load_balancer_writes, before.load_balancer_writes + 2);
    f.network.assert_foreign_children_intact();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_remove_orphans_retries_after_concurrent_write() -> Result<(), anyhow::Error> {
    let f = fixture();
    f.network.seed_compound_rule("leftover01");
    f.network.write_after_next_reads(1);

    let removed = f.lb.remove_orphans().await?;

    assert_eq!(removed, 3);
    f.network
        .assert_no_harness_resources()
        .assert_foreign_children_intact();
    Ok(())
}

// ===== Contention =====

/// A read that is already stale when the write goes out is contention: the
/// write is not retried and nothing is bound.
#[tokio::test]
async fn test_add_rules_with_stale_read_is_contended() -> Result<(), anyhow::Error> {
    // Arrange
    let f = fixture();
    let created = f.ips.create(1).await?;
    f.network.write_after_next_reads(1);

    // Act
    let binding = f.lb.add_rules(&created).await?;

    // Assert
    assert!(
        matches!(binding, RuleBinding::Contended { .. }),
        "Expected contention, got {binding:?}"
    );
    assert_eq!(f.network.calls().load_balancer_writes, 1);
    assert!(f.network.harness_children().is_empty());
    Ok(())
}

/// Concurrent calls on one manager take turns, so neither update is lost.
#[tokio::test]
async fn test_concurrent_add_rules_on_one_manager_both_bind() -> Result<(), anyhow::Error> {
    // Arrange
    let f = fixture();
    let created = f.ips.create(2).await?;
    let (first, second) = match created.as_slice() {
        [first, second] => (first, second),
        other => anyhow::bail!("expected two ips, got {}", other.len()),
    };

    // Act
    let (a, b) = tokio::join!(
        f.lb.add_rules(std::slice::from_ref(first)),
        f.lb.add_rules(std::slice::from_ref(second)),
    );

    // Assert
    assert_eq!(a?, RuleBinding::Bound);
    assert_eq!(b?, RuleBinding::Bound);
    assert_eq!(children_with_suffix(&f.network, first).len(), 3);
    assert_eq!(children_with_suffix(&f.network, second).len(), 3);
    f.network.assert_foreign_children_intact();
    Ok(())
}

/// Two managers share no lock, like two processes. Their reads interleave;
/// the etag lets exactly one write through and the other is contended.
#[tokio::test]
async fn test_concurrent_writers_never_lose_an_update() -> Result<(), anyhow::Error> {
    // Arrange
    let f = fixture();
    let second_writer = LoadBalancerManager::new(f.network.clone(), test_scope());
    let created = f.ips.create(2).await?;
    let (first, second) = match created.as_slice() {
        [first, second] => (first, second),
        other => anyhow::bail!("expected two ips, got {}", other.len()),
    };

    // Act
    let (a, b) = tokio::join!(
        f.lb.add_rules(std::slice::from_ref(first)),
        second_writer.add_rules(std::slice::from_ref(second)),
    );
    let (a, b) = (a?, b?);

    // Assert
    assert_eq!(
        [a.is_bound(), b.is_bound()].iter().filter(|bound| **bound).count(),
        1,
        "Expected exactly one winner, got {a:?} and {b:?}"
    );
    let (winner, loser) = if a.is_bound() {
        (first, second)
    } else {
        (second, first)
    };
    assert_eq!(children_with_suffix(&f.network, winner).len(), 3);
    assert!(children_with_suffix(&f.network, loser).is_empty());

    // The loser's address is unbound and can be released.
    f.ips.delete(loser).await?;
    Ok(())
}

/// A write the API accepted but then failed to provision must not leave the
/// new children behind: they are removed again and the IP is reported as
/// unbound.
#[tokio::test]
async fn test_add_rules_rolls_back_failed_provisioning() -> Result<(), anyhow::Error> {
    // Arrange
    let f = fixture();
    let created = f.ips.create(1).await?;
    f.network.fail_next_lb_provisioning(1);

    // Act
    let binding = f.lb.add_rules(&created).await?;

    // Assert
    assert!(
        matches!(binding, RuleBinding::Contended { .. }),
        "Expected contention, got {binding:?}"
    );
    assert!(!f.lb.check_for_orphans(false).await?.any());

    let ip = created.first().expect("created one ip");
    f.ips.delete(ip).await?;
    f.network
        .assert_no_harness_resources()
        .assert_foreign_children_intact();
    Ok(())
}

#[tokio::test]
async fn test_add_rules_propagates_when_rollback_fails() -> Result<(), anyhow::Error> {
    let f = fixture();
    let created = f.ips.create(1).await?;
    // The binding and its rollback both fail provisioning.
    f.network.fail_next_lb_provisioning(2);

    let result = f.lb.add_rules(&created).await;

    assert!(
        matches!(result, Err(NetworkError::ProvisioningFailed { .. })),
        "got {result:?}"
    );
    Ok(())
}

#[tokio::test]
async fn test_remove_orphans_is_idempotent() -> Result<(), anyhow::Error> {
    // Arrange
    let f = fixture();
    f.network.seed_compound_rule("leftover01");
    f.network.seed_probe("prb-stray00001");

    // Act
    let first = f.lb.remove_orphans().await?;
    let writes_after_first = f.network.calls().load_balancer_writes;
    let second = f.lb.remove_orphans().await?;

    // Assert
    assert_eq!(first, 4);
    assert_eq!(second, 0);
    assert_eq!(
        f.network.calls().load_balancer_writes,
        writes_after_first,
        "Nothing to remove must mean no write"
    );
    f.network
        .assert_no_harness_resources()
        .assert_foreign_children_intact();
    Ok(())
}

#[tokio::test]
async fn test_discover_orphans_counts_each_collection() -> Result<(), anyhow::Error> {
    let f = fixture();
    f.network.seed_compound_rule("leftover01");
    f.network.seed_probe("prb-stray00001");

    let orphans = f.lb.discover_orphans().await?;
    let counts = orphans.counts();

    assert_eq!(counts.rules, 1);
    assert_eq!(counts.frontend_ip_configurations, 1);
    assert_eq!(counts.probes, 2);
    assert_eq!(counts.total(), 4);
    assert!(!orphans.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_check_for_orphans_raises_on_single_probe() -> Result<(), anyhow::Error> {
    let f = fixture();
    f.network.seed_probe("prb-stray00001");

    let counts = f.lb.check_for_orphans(false).await?;
    assert_eq!(counts.probes, 1);
    assert!(counts.any());

    match f.lb.check_for_orphans(true).await {
        Err(HarnessError::LeakDetected(report)) => {
            assert_eq!(report.probes, vec!["prb-stray00001".to_string()]);
            assert!(report.rules.is_empty());
            assert!(report.public_ips.is_empty());
        }
        other => anyhow::bail!("expected a leak, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_check_for_orphans_clean_load_balancer() -> Result<(), anyhow::Error> {
    let f = fixture();

    let counts = f.lb.check_for_orphans(true).await?;

    assert!(!counts.any());
    assert_eq!(f.network.calls().load_balancer_writes, 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_load_balancer_propagates_not_found() {
    let network = Arc::new(FakeNetwork::new(test_scope()));
    let other_group = ResourceScope::new(
        test_scope().subscription_id,
        "shoot--other--cluster",
        TEST_LOCATION,
    );
    let lb = LoadBalancerManager::new(network, other_group);

    let result = lb.add_rules(&[]).await;

    assert!(matches!(result, Err(NetworkError::NotFound(_))));
}
