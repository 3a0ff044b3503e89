//! Leak detection: a read-only sweep for harness-named leftovers.

use crate::errors::HarnessError;
use crate::load_balancer::{LoadBalancerManager, LoadBalancerOrphans};
use crate::public_ip::{PublicIp, PublicIpManager};
use std::fmt;
use tracing::{info, instrument, warn};

/// Names of every orphan found by one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakReport {
    pub public_ips: Vec<String>,
    pub rules: Vec<String>,
    pub frontend_ip_configurations: Vec<String>,
    pub probes: Vec<String>,
}

impl LeakReport {
    pub fn new(public_ips: &[PublicIp], load_balancer: &LoadBalancerOrphans) -> Self {
        Self {
            public_ips: public_ips.iter().map(|ip| ip.name.clone()).collect(),
            ..Self::from_load_balancer(load_balancer)
        }
    }

    pub fn from_load_balancer(orphans: &LoadBalancerOrphans) -> Self {
        Self {
            public_ips: Vec::new(),
            rules: orphans.rules.iter().map(|r| r.name.clone()).collect(),
            frontend_ip_configurations: orphans
                .frontend_ip_configurations
                .iter()
                .map(|f| f.name.clone())
                .collect(),
            probes: orphans.probes.iter().map(|p| p.name.clone()).collect(),
        }
    }

    /// True if no category has a leftover.
    pub fn is_clean(&self) -> bool {
        self.public_ips.is_empty()
            && self.rules.is_empty()
            && self.frontend_ip_configurations.is_empty()
            && self.probes.is_empty()
    }

    pub fn total(&self) -> usize {
        self.public_ips.len()
            + self.rules.len()
            + self.frontend_ip_configurations.len()
            + self.probes.len()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "public ips: {} - lb rules: {} - fip configs: {} - health probes: {}",
            self.public_ips.len(),
            self.rules.len(),
            self.frontend_ip_configurations.len(),
            self.probes.len()
        )
    }
}

/// Aggregates orphan discovery across the public IP and load-balancer
/// managers. Never mutates anything.
pub struct LeakDetector<'a> {
    public_ips: &'a PublicIpManager,
    load_balancer: &'a LoadBalancerManager,
}

impl<'a> LeakDetector<'a> {
    pub fn new(public_ips: &'a PublicIpManager, load_balancer: &'a LoadBalancerManager) -> Self {
        Self {
            public_ips,
            load_balancer,
        }
    }

    /// Sweep for orphans and log the counts. With `raise_on_leak`, any
    /// orphan in any category fails with [`HarnessError::LeakDetected`].
    #[instrument(skip_all, fields(raise_on_leak = raise_on_leak))]
    pub async fn check(&self, raise_on_leak: bool) -> Result<LeakReport, HarnessError> {
        let ips = self.public_ips.discover_orphans().await?;
        let lb_orphans = self.load_balancer.discover_orphans().await?;
        let report = LeakReport::new(&ips, &lb_orphans);

        info!(
            target: "remedy_chaos.leak",
            public_ips = report.public_ips.len(),
            rules = report.rules.len(),
            frontend_ip_configurations = report.frontend_ip_configurations.len(),
            probes = report.probes.len(),
            "Orphaned resource counts"
        );

        if report.is_clean() {
            return Ok(report);
        }

        warn!(
            target: "remedy_chaos.leak",
            public_ips = ?report.public_ips,
            rules = ?report.rules,
            frontend_ip_configurations = ?report.frontend_ip_configurations,
            probes = ?report.probes,
            "Orphaned resources found"
        );

        if raise_on_leak {
            return Err(HarnessError::LeakDetected(report));
        }
        Ok(report)
    }
}
