//! Assertions over the fakes' end state.

use crate::fake_network::{FakeNetwork, FOREIGN_FRONTEND, FOREIGN_PROBE, FOREIGN_RULE};

/// Custom assertions for the fake cloud network.
///
/// # Example
/// ```rust,ignore
/// network
///     .assert_no_harness_resources()
///     .assert_foreign_children_intact();
/// ```
pub trait NetworkAssertions {
    /// Assert no `ip-` address and no `fip-`/`lbr-`/`prb-` child remains.
    fn assert_no_harness_resources(&self) -> &Self;

    /// Assert the load balancer's non-harness children survived.
    fn assert_foreign_children_intact(&self) -> &Self;
}

impl NetworkAssertions for FakeNetwork {
    fn assert_no_harness_resources(&self) -> &Self {
        let ips: Vec<String> = self
            .public_ip_names()
            .into_iter()
            .filter(|name| name.starts_with("ip-"))
            .collect();
        assert!(ips.is_empty(), "Leftover public IPs: {ips:?}");

        let children = self.harness_children();
        assert!(
            children.is_empty(),
            "Leftover load balancer children: {children:?}"
        );
        self
    }

    fn assert_foreign_children_intact(&self) -> &Self {
        let lb = self.load_balancer();
        let properties = &lb.properties;
        assert!(
            properties
                .frontend_ip_configurations
                .iter()
                .any(|f| f.name == FOREIGN_FRONTEND),
            "Foreign frontend configuration was removed"
        );
        assert!(
            properties
                .load_balancing_rules
                .iter()
                .any(|r| r.name == FOREIGN_RULE),
            "Foreign rule was removed"
        );
        assert!(
            properties.probes.iter().any(|p| p.name == FOREIGN_PROBE),
            "Foreign probe was removed"
        );
        assert_eq!(
            properties.backend_address_pools.len(),
            1,
            "Backend pools must survive read-modify-write"
        );
        self
    }
}
