//! Compound-rule management on the shared load balancer.
//!
//! Each harness public IP is bound into the load balancer as a triple of
//! children named after its suffix: a frontend IP configuration (`fip-s`), a
//! load-balancing rule (`lbr-s`) and a health probe (`prb-s`). The cloud API
//! has no per-child operations, so every change here is a full
//! read-modify-write of the aggregate.
//!
//! Writes from one manager are serialized by an async mutex, and every write
//! is conditional on the etag of the read it was derived from. A concurrent
//! writer elsewhere therefore surfaces as a rejected write, never as a
//! silently dropped update. Removals re-read and retry a bounded number of
//! times after such a rejection; additions report it as contention.

use crate::cloud::model::{
    FrontendIpConfiguration, FrontendIpConfigurationProperties, IpAllocationMethod, LoadBalancer,
    LoadBalancingRule, LoadBalancingRuleProperties, NamedEntry, Probe, ProbeProperties,
    SubResource,
};
use crate::cloud::{LoadBalancerCollection, NetworkApi, ResourceScope};
use crate::errors::{HarnessError, NetworkError};
use crate::identity::{derive_name, FRONTEND_IP_PREFIX, PROBE_PREFIX, RULE_PREFIX};
use crate::leak::LeakReport;
use crate::public_ip::PublicIp;
use rand::Rng;
use serde_json::Map;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

// ===== Rule defaults =====

pub const RULE_PROTOCOL: &str = "Tcp";

/// Frontend and backend port are drawn from this range (and are equal).
pub const RULE_PORT_RANGE: RangeInclusive<u16> = 2000..=4000;

pub const RULE_IDLE_TIMEOUT_MINUTES: u32 = 4;
pub const RULE_LOAD_DISTRIBUTION: &str = "Default";

pub const PROBE_PROTOCOL: &str = "Tcp";

/// Probe ports are `PROBE_BASE_PORT + [0, PROBE_PORT_SPREAD]`.
pub const PROBE_BASE_PORT: u16 = 32000;
pub const PROBE_PORT_SPREAD: u16 = 2500;

pub const PROBE_INTERVAL_SECONDS: u32 = 60;
pub const PROBE_COUNT: u32 = 4;

// ===== Write retries =====

/// Read-modify-write attempts for a removal before a conflict is returned.
pub const WRITE_ATTEMPTS: u32 = 4;

/// Delay before the second attempt; later attempts wait proportionally
/// longer, with jitter.
pub const WRITE_RETRY_DELAY: Duration = Duration::from_millis(250);

// ===== Results =====

/// Outcome of [`LoadBalancerManager::add_rules`].
///
/// Contention is a routine outcome, not an error: the caller still owns the
/// input IPs and must release them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleBinding {
    /// The write went through; every input IP now has its triple.
    Bound,
    /// The write was rejected, or failed and was rolled back; nothing is
    /// bound.
    Contended { reason: String },
}

impl RuleBinding {
    pub fn is_bound(&self) -> bool {
        matches!(self, RuleBinding::Bound)
    }
}

/// Prefix-matched children found in the load balancer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadBalancerOrphans {
    pub rules: Vec<LoadBalancingRule>,
    pub frontend_ip_configurations: Vec<FrontendIpConfiguration>,
    pub probes: Vec<Probe>,
}

impl LoadBalancerOrphans {
    pub fn counts(&self) -> OrphanCounts {
        OrphanCounts {
            rules: self.rules.len(),
            frontend_ip_configurations: self.frontend_ip_configurations.len(),
            probes: self.probes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.counts().any()
    }
}

/// Per-collection orphan counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrphanCounts {
    pub rules: usize,
    pub frontend_ip_configurations: usize,
    pub probes: usize,
}

impl OrphanCounts {
    /// True if any single collection has an orphan.
    pub fn any(&self) -> bool {
        self.rules != 0 || self.frontend_ip_configurations != 0 || self.probes != 0
    }

    pub fn total(&self) -> usize {
        self.rules + self.frontend_ip_configurations + self.probes
    }
}

// ===== Compound rule =====

/// The three children that bind one public IP into the load balancer.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundRule {
    pub frontend_ip_configuration: FrontendIpConfiguration,
    pub rule: LoadBalancingRule,
    pub probe: Probe,
}

impl CompoundRule {
    /// Build the triple for `ip`. The children reference each other by the
    /// ids they will have once written.
    pub fn for_public_ip(
        scope: &ResourceScope,
        load_balancer: &str,
        backend_pool: &str,
        ip: &PublicIp,
        rule_port: u16,
        probe_port: u16,
    ) -> Self {
        let fip_name = derive_name(FRONTEND_IP_PREFIX, &ip.suffix);
        let rule_name = derive_name(RULE_PREFIX, &ip.suffix);
        let probe_name = derive_name(PROBE_PREFIX, &ip.suffix);

        let child_id = |collection, name: &str| {
            SubResource::new(scope.load_balancer_child_id(load_balancer, collection, name))
        };

        let frontend_ip_configuration = FrontendIpConfiguration {
            name: fip_name.clone(),
            id: None,
            properties: FrontendIpConfigurationProperties {
                private_ip_allocation_method: Some(IpAllocationMethod::Dynamic),
                public_ip_address: Some(SubResource::new(ip.id.clone())),
                extra: Map::new(),
            },
            extra: Map::new(),
        };

        let probe = Probe {
            name: probe_name.clone(),
            id: None,
            properties: ProbeProperties {
                protocol: Some(PROBE_PROTOCOL.to_string()),
                port: Some(probe_port),
                interval_in_seconds: Some(PROBE_INTERVAL_SECONDS),
                number_of_probes: Some(PROBE_COUNT),
                extra: Map::new(),
            },
            extra: Map::new(),
        };

        let rule = LoadBalancingRule {
            name: rule_name,
            id: None,
            properties: LoadBalancingRuleProperties {
                protocol: Some(RULE_PROTOCOL.to_string()),
                frontend_port: Some(rule_port),
                backend_port: Some(rule_port),
                idle_timeout_in_minutes: Some(RULE_IDLE_TIMEOUT_MINUTES),
                enable_floating_ip: Some(true),
                load_distribution: Some(RULE_LOAD_DISTRIBUTION.to_string()),
                frontend_ip_configuration: Some(child_id(
                    LoadBalancerCollection::FrontendIpConfigurations,
                    &fip_name,
                )),
                backend_address_pool: Some(child_id(
                    LoadBalancerCollection::BackendAddressPools,
                    backend_pool,
                )),
                probe: Some(child_id(LoadBalancerCollection::Probes, &probe_name)),
                extra: Map::new(),
            },
            extra: Map::new(),
        };

        Self {
            frontend_ip_configuration,
            rule,
            probe,
        }
    }
}

/// Random rule port and probe port.
fn random_ports() -> (u16, u16) {
    let mut rng = rand::thread_rng();
    let rule_port = rng.gen_range(RULE_PORT_RANGE);
    let probe_port = PROBE_BASE_PORT + rng.gen_range(0..=PROBE_PORT_SPREAD);
    (rule_port, probe_port)
}

fn has_prefix<T: NamedEntry>(entry: &T, prefix: &str) -> bool {
    entry.name().starts_with(prefix)
}

fn contains_any<T: NamedEntry>(entry: &T, suffixes: &[&str]) -> bool {
    suffixes.iter().any(|suffix| entry.name().contains(suffix))
}

fn child_count(load_balancer: &LoadBalancer) -> usize {
    let properties = &load_balancer.properties;
    properties.frontend_ip_configurations.len()
        + properties.load_balancing_rules.len()
        + properties.probes.len()
}

/// Drop every child whose name contains one of `suffixes`. Returns how many
/// were dropped.
fn strip_suffixes(load_balancer: &mut LoadBalancer, suffixes: &[&str]) -> usize {
    let before = child_count(load_balancer);
    let properties = &mut load_balancer.properties;
    properties
        .frontend_ip_configurations
        .retain(|f| !contains_any(f, suffixes));
    properties
        .load_balancing_rules
        .retain(|r| !contains_any(r, suffixes));
    properties.probes.retain(|p| !contains_any(p, suffixes));
    before - child_count(load_balancer)
}

/// Drop every child carrying a harness prefix. Returns how many were
/// dropped.
fn strip_prefixed(load_balancer: &mut LoadBalancer) -> usize {
    let before = child_count(load_balancer);
    let properties = &mut load_balancer.properties;
    properties
        .frontend_ip_configurations
        .retain(|f| !has_prefix(f, FRONTEND_IP_PREFIX));
    properties
        .load_balancing_rules
        .retain(|r| !has_prefix(r, RULE_PREFIX));
    properties.probes.retain(|p| !has_prefix(p, PROBE_PREFIX));
    before - child_count(load_balancer)
}

/// Linear backoff with 0.5x to 1.5x jitter.
fn retry_delay(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    WRITE_RETRY_DELAY.mul_f64(f64::from(attempt) * jitter)
}

fn orphans_of(load_balancer: &LoadBalancer) -> LoadBalancerOrphans {
    let properties = &load_balancer.properties;
    LoadBalancerOrphans {
        rules: properties
            .load_balancing_rules
            .iter()
            .filter(|r| has_prefix(*r, RULE_PREFIX))
            .cloned()
            .collect(),
        frontend_ip_configurations: properties
            .frontend_ip_configurations
            .iter()
            .filter(|f| has_prefix(*f, FRONTEND_IP_PREFIX))
            .cloned()
            .collect(),
        probes: properties
            .probes
            .iter()
            .filter(|p| has_prefix(*p, PROBE_PREFIX))
            .cloned()
            .collect(),
    }
}

// ===== Manager =====

/// Read-modify-write access to the compound rules of one load balancer.
///
/// The load balancer and its backend pool are both named after the resource
/// group.
pub struct LoadBalancerManager {
    network: Arc<dyn NetworkApi>,
    scope: ResourceScope,
    load_balancer_name: String,
    backend_pool_name: String,
    write_lock: Mutex<()>,
}

impl LoadBalancerManager {
    pub fn new(network: Arc<dyn NetworkApi>, scope: ResourceScope) -> Self {
        let load_balancer_name = scope.resource_group.clone();
        let backend_pool_name = scope.resource_group.clone();
        Self {
            network,
            scope,
            load_balancer_name,
            backend_pool_name,
            write_lock: Mutex::new(()),
        }
    }

    pub fn load_balancer_name(&self) -> &str {
        &self.load_balancer_name
    }

    async fn read(&self) -> Result<LoadBalancer, NetworkError> {
        self.network.get_load_balancer(&self.load_balancer_name).await
    }

    /// Read, edit and write the aggregate, re-reading after a write that
    /// lost an etag race. `edit` returns `None` when no write is needed.
    /// Callers hold the write lock.
    async fn rewrite<T>(
        &self,
        operation: &'static str,
        mut edit: impl FnMut(&mut LoadBalancer) -> Option<T>,
    ) -> Result<Option<T>, NetworkError> {
        let mut attempt = 1;
        loop {
            let mut load_balancer = self.read().await?;
            let Some(value) = edit(&mut load_balancer) else {
                return Ok(None);
            };

            match self.network.update_load_balancer(&load_balancer).await {
                Ok(_) => return Ok(Some(value)),
                Err(e) if e.is_conflict() && attempt < WRITE_ATTEMPTS => {
                    let delay = retry_delay(attempt);
                    warn!(
                        target: "remedy_chaos.load_balancer",
                        operation,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "Load balancer changed concurrently, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Bind every IP in `ips` into the load balancer with one write.
    ///
    /// Read failures propagate. A write rejected by the API (a conflict) is
    /// reported as [`RuleBinding::Contended`] and leaves the aggregate
    /// untouched. Any other write failure may come after the API accepted
    /// the new children, so they are removed again before `Contended` is
    /// returned; if that removal fails too, the write error propagates and
    /// the IPs must be treated as bound. An empty input still performs the
    /// read and the write.
    #[instrument(skip_all, fields(count = ips.len()))]
    pub async fn add_rules(&self, ips: &[PublicIp]) -> Result<RuleBinding, NetworkError> {
        let _guard = self.write_lock.lock().await;
        let mut load_balancer = self.read().await?;

        for ip in ips {
            let (rule_port, probe_port) = random_ports();
            let compound = CompoundRule::for_public_ip(
                &self.scope,
                &self.load_balancer_name,
                &self.backend_pool_name,
                ip,
                rule_port,
                probe_port,
            );
            let properties = &mut load_balancer.properties;
            properties
                .frontend_ip_configurations
                .push(compound.frontend_ip_configuration);
            properties.load_balancing_rules.push(compound.rule);
            properties.probes.push(compound.probe);
        }

        let e = match self.network.update_load_balancer(&load_balancer).await {
            Ok(_) => {
                info!(
                    target: "remedy_chaos.load_balancer",
                    ips = ?ips.iter().map(|ip| ip.name.as_str()).collect::<Vec<_>>(),
                    "Bound public IPs into load balancer"
                );
                return Ok(RuleBinding::Bound);
            }
            Err(e) => e,
        };

        if e.is_conflict() {
            warn!(
                target: "remedy_chaos.load_balancer",
                error = %e,
                "Load balancer update rejected, rules not added"
            );
            return Ok(RuleBinding::Contended {
                reason: e.to_string(),
            });
        }

        warn!(
            target: "remedy_chaos.load_balancer",
            error = %e,
            "Load balancer update failed after it may have been applied, removing the new rules"
        );
        let suffixes: Vec<&str> = ips.iter().map(|ip| ip.suffix.as_str()).collect();
        match self
            .rewrite("add_rules rollback", |lb| {
                let removed = strip_suffixes(lb, &suffixes);
                (removed > 0).then_some(removed)
            })
            .await
        {
            Ok(removed) => {
                info!(
                    target: "remedy_chaos.load_balancer",
                    removed = removed.unwrap_or(0),
                    "Rolled back failed rule binding"
                );
                Ok(RuleBinding::Contended {
                    reason: e.to_string(),
                })
            }
            Err(rollback) => {
                error!(
                    target: "remedy_chaos.load_balancer",
                    error = %e,
                    rollback_error = %rollback,
                    "Could not roll back failed rule binding"
                );
                Err(e)
            }
        }
    }

    /// Remove every child whose name contains one of the IPs' suffixes.
    ///
    /// Retries after concurrent writes up to [`WRITE_ATTEMPTS`] times.
    #[instrument(skip_all, fields(count = ips.len()))]
    pub async fn delete_rules(&self, ips: &[PublicIp]) -> Result<(), NetworkError> {
        let suffixes: Vec<&str> = ips.iter().map(|ip| ip.suffix.as_str()).collect();

        let _guard = self.write_lock.lock().await;
        self.rewrite("delete_rules", |lb| {
            strip_suffixes(lb, &suffixes);
            Some(())
        })
        .await?;

        info!(
            target: "remedy_chaos.load_balancer",
            suffixes = ?suffixes,
            "Deleted compound rules"
        );
        Ok(())
    }

    /// Children whose names carry a harness prefix.
    pub async fn discover_orphans(&self) -> Result<LoadBalancerOrphans, NetworkError> {
        let load_balancer = self.read().await?;
        Ok(orphans_of(&load_balancer))
    }

    /// Log the orphan counts and, with `raise_on_leak`, fail if any is
    /// nonzero.
    pub async fn check_for_orphans(&self, raise_on_leak: bool) -> Result<OrphanCounts, HarnessError> {
        let orphans = self.discover_orphans().await?;
        let counts = orphans.counts();

        info!(
            target: "remedy_chaos.load_balancer",
            rules = counts.rules,
            frontend_ip_configurations = counts.frontend_ip_configurations,
            probes = counts.probes,
            "Load balancer orphan counts"
        );

        if raise_on_leak && counts.any() {
            return Err(HarnessError::LeakDetected(LeakReport::from_load_balancer(
                &orphans,
            )));
        }
        Ok(counts)
    }

    /// Remove every prefix-matched child with a single write. Issues no
    /// write when there is nothing to remove. Returns the number of children
    /// removed.
    ///
    /// Retries after concurrent writes up to [`WRITE_ATTEMPTS`] times.
    #[instrument(skip_all)]
    pub async fn remove_orphans(&self) -> Result<usize, NetworkError> {
        let _guard = self.write_lock.lock().await;
        let removed = self
            .rewrite("remove_orphans", |lb| {
                let removed = strip_prefixed(lb);
                (removed > 0).then_some(removed)
            })
            .await?;

        let Some(removed) = removed else {
            debug!(target: "remedy_chaos.load_balancer", "No orphaned children to remove");
            return Ok(0);
        };
        info!(
            target: "remedy_chaos.load_balancer",
            removed,
            "Removed orphaned load balancer children"
        );
        Ok(removed)
    }
}
