//! In-memory [`NetworkApi`] with the load balancer's conditional-write
//! semantics.
//!
//! Every read hands out the current etag; an update carrying a stale etag is
//! rejected as a conflict, just like the real API. Every load-balancer read
//! yields once, so concurrent read-modify-write cycles really interleave.
//! Failures can be injected to exercise contention and cleanup paths.

use remedy_chaos::cloud::model::{
    FrontendIpConfiguration, FrontendIpConfigurationProperties, LoadBalancer, LoadBalancingRule,
    LoadBalancingRuleProperties, Probe, ProbeProperties, PublicIpAddress,
    PublicIpAddressProperties, PublicIpParameters, SubResource,
};
use remedy_chaos::cloud::{LoadBalancerCollection, NetworkApi, ResourceScope};
use remedy_chaos::errors::NetworkError;
use serde_json::{json, Map};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Name of the non-harness frontend configuration every fake load balancer
/// starts with.
pub const FOREIGN_FRONTEND: &str = "a1b2c3d4e5f6-kubernetes";

/// Name of the non-harness rule every fake load balancer starts with.
pub const FOREIGN_RULE: &str = "a1b2c3d4e5f6-TCP-80";

/// Name of the non-harness probe every fake load balancer starts with.
pub const FOREIGN_PROBE: &str = "a1b2c3d4e5f6-TCP-31080";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NetworkCalls {
    pub public_ip_creates: usize,
    pub public_ip_deletes: usize,
    pub load_balancer_reads: usize,
    pub load_balancer_writes: usize,
}

struct NetworkState {
    public_ips: BTreeMap<String, PublicIpAddress>,
    load_balancer: LoadBalancer,
    version: u64,
    next_address: u32,
    fail_next_lb_updates: usize,
    fail_next_lb_provisioning: usize,
    writes_after_next_reads: usize,
    reject_lb_updates: bool,
    fail_public_ip_creates: bool,
    calls: NetworkCalls,
}

pub struct FakeNetwork {
    scope: ResourceScope,
    state: Mutex<NetworkState>,
}

impl FakeNetwork {
    /// A resource group holding one load balancer (named after the group)
    /// with a single non-harness frontend, rule and probe.
    pub fn new(scope: ResourceScope) -> Self {
        let name = scope.resource_group.clone();
        let mut load_balancer = LoadBalancer::new(name.clone(), scope.location.clone());
        load_balancer.id = Some(scope.load_balancer_id(&name));
        load_balancer.properties.backend_address_pools = vec![json!({
            "name": name,
            "id": scope.load_balancer_child_id(&name, LoadBalancerCollection::BackendAddressPools, &name),
        })];
        load_balancer
            .properties
            .frontend_ip_configurations
            .push(frontend(FOREIGN_FRONTEND, "/foreign/publicIPAddresses/kube"));
        load_balancer
            .properties
            .load_balancing_rules
            .push(rule(&scope, &name, FOREIGN_RULE, FOREIGN_FRONTEND, FOREIGN_PROBE));
        load_balancer
            .properties
            .probes
            .push(probe(FOREIGN_PROBE, 31080));

        Self {
            scope,
            state: Mutex::new(NetworkState {
                public_ips: BTreeMap::new(),
                load_balancer,
                version: 1,
                next_address: 1,
                fail_next_lb_updates: 0,
                fail_next_lb_provisioning: 0,
                writes_after_next_reads: 0,
                reject_lb_updates: false,
                fail_public_ip_creates: false,
                calls: NetworkCalls::default(),
            }),
        }
    }

    pub fn scope(&self) -> &ResourceScope {
        &self.scope
    }

    // ===== Failure injection =====

    /// Reject the next `n` load-balancer updates with a conflict.
    pub fn fail_next_lb_updates(&self, n: usize) {
        self.state.lock().unwrap().fail_next_lb_updates = n;
    }

    /// Accept the next `n` load-balancer updates but report each as having
    /// failed provisioning afterwards.
    pub fn fail_next_lb_provisioning(&self, n: usize) {
        self.state.lock().unwrap().fail_next_lb_provisioning = n;
    }

    /// Let another writer update the aggregate right after each of the next
    /// `n` load-balancer reads, so the etag handed out is already stale.
    pub fn write_after_next_reads(&self, n: usize) {
        self.state.lock().unwrap().writes_after_next_reads = n;
    }

    /// Reject every load-balancer update until switched off.
    pub fn reject_lb_updates(&self, reject: bool) {
        self.state.lock().unwrap().reject_lb_updates = reject;
    }

    /// Fail every public IP creation until switched off.
    pub fn fail_public_ip_creates(&self, fail: bool) {
        self.state.lock().unwrap().fail_public_ip_creates = fail;
    }

    // ===== Seeding =====

    /// Add a public IP directly, bypassing call counters.
    pub fn seed_public_ip(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let resource = self.address(&mut state, name);
        state.public_ips.insert(name.to_string(), resource);
    }

    /// Add a harness-named triple for `suffix`, referencing the public IP
    /// `ip-<suffix>`.
    pub fn seed_compound_rule(&self, suffix: &str) {
        let lb_name = self.scope.resource_group.clone();
        let fip = format!("fip-{suffix}");
        let lbr = format!("lbr-{suffix}");
        let prb = format!("prb-{suffix}");
        let ip_id = self.scope.public_ip_id(&format!("ip-{suffix}"));

        let mut state = self.state.lock().unwrap();
        let properties = &mut state.load_balancer.properties;
        properties
            .frontend_ip_configurations
            .push(frontend(&fip, &ip_id));
        properties
            .load_balancing_rules
            .push(rule(&self.scope, &lb_name, &lbr, &fip, &prb));
        properties.probes.push(probe(&prb, 32100));
        state.version += 1;
    }

    /// Add a lone harness-named probe.
    pub fn seed_probe(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.load_balancer.properties.probes.push(probe(name, 32200));
        state.version += 1;
    }

    /// Do what the controller does for an orphaned address: remove every
    /// load-balancer child named after it, then delete it.
    pub fn reclaim_public_ip(&self, name: &str) {
        let suffix = name.trim_start_matches("ip-").to_string();
        let mut state = self.state.lock().unwrap();

        let properties = &mut state.load_balancer.properties;
        let before = properties.frontend_ip_configurations.len()
            + properties.load_balancing_rules.len()
            + properties.probes.len();
        properties
            .frontend_ip_configurations
            .retain(|f| !f.name.ends_with(&suffix));
        properties
            .load_balancing_rules
            .retain(|r| !r.name.ends_with(&suffix));
        properties.probes.retain(|p| !p.name.ends_with(&suffix));
        let after = properties.frontend_ip_configurations.len()
            + properties.load_balancing_rules.len()
            + properties.probes.len();
        if after != before {
            state.version += 1;
        }
        state.public_ips.remove(name);
    }

    // ===== Inspection =====

    pub fn public_ip_names(&self) -> Vec<String> {
        self.state.lock().unwrap().public_ips.keys().cloned().collect()
    }

    pub fn load_balancer(&self) -> LoadBalancer {
        self.state.lock().unwrap().load_balancer.clone()
    }

    pub fn calls(&self) -> NetworkCalls {
        self.state.lock().unwrap().calls
    }

    /// Names of every load-balancer child carrying a harness prefix.
    pub fn harness_children(&self) -> Vec<String> {
        let lb = self.load_balancer();
        let properties = &lb.properties;
        properties
            .frontend_ip_configurations
            .iter()
            .map(|f| f.name.clone())
            .chain(properties.load_balancing_rules.iter().map(|r| r.name.clone()))
            .chain(properties.probes.iter().map(|p| p.name.clone()))
            .filter(|name| {
                name.starts_with("fip-") || name.starts_with("lbr-") || name.starts_with("prb-")
            })
            .collect()
    }

    fn address(&self, state: &mut NetworkState, name: &str) -> PublicIpAddress {
        let n = state.next_address;
        state.next_address += 1;
        PublicIpAddress {
            name: name.to_string(),
            id: self.scope.public_ip_id(name),
            location: Some(self.scope.location.clone()),
            properties: PublicIpAddressProperties {
                ip_address: Some(format!("20.0.{}.{}", n / 256, n % 256)),
                provisioning_state: Some("Succeeded".to_string()),
                extra: Map::new(),
            },
        }
    }
}

fn etag(version: u64) -> String {
    format!("W/\"{version}\"")
}

fn references(frontend: &FrontendIpConfiguration, public_ip_id: &str) -> bool {
    frontend
        .properties
        .public_ip_address
        .as_ref()
        .is_some_and(|ip| ip.id == public_ip_id)
}

fn frontend(name: &str, public_ip_id: &str) -> FrontendIpConfiguration {
    FrontendIpConfiguration {
        name: name.to_string(),
        id: None,
        properties: FrontendIpConfigurationProperties {
            private_ip_allocation_method: None,
            public_ip_address: Some(SubResource::new(public_ip_id)),
            extra: Map::new(),
        },
        extra: Map::new(),
    }
}

fn rule(scope: &ResourceScope, lb: &str, name: &str, fip: &str, prb: &str) -> LoadBalancingRule {
    LoadBalancingRule {
        name: name.to_string(),
        id: None,
        properties: LoadBalancingRuleProperties {
            protocol: Some("Tcp".to_string()),
            frontend_port: Some(80),
            backend_port: Some(80),
            idle_timeout_in_minutes: None,
            enable_floating_ip: None,
            load_distribution: None,
            frontend_ip_configuration: Some(SubResource::new(scope.load_balancer_child_id(
                lb,
                LoadBalancerCollection::FrontendIpConfigurations,
                fip,
            ))),
            backend_address_pool: None,
            probe: Some(SubResource::new(scope.load_balancer_child_id(
                lb,
                LoadBalancerCollection::Probes,
                prb,
            ))),
            extra: Map::new(),
        },
        extra: Map::new(),
    }
}

fn probe(name: &str, port: u16) -> Probe {
    Probe {
        name: name.to_string(),
        id: None,
        properties: ProbeProperties {
            protocol: Some("Tcp".to_string()),
            port: Some(port),
            interval_in_seconds: None,
            number_of_probes: None,
            extra: Map::new(),
        },
        extra: Map::new(),
    }
}

#[async_trait::async_trait]
impl NetworkApi for FakeNetwork {
    async fn create_public_ip(
        &self,
        name: &str,
        _parameters: &PublicIpParameters,
    ) -> Result<PublicIpAddress, NetworkError> {
        let mut state = self.state.lock().unwrap();
        state.calls.public_ip_creates += 1;
        if state.fail_public_ip_creates {
            return Err(NetworkError::Api {
                status: 400,
                code: "PublicIPCountLimitReached".to_string(),
                message: "injected failure".to_string(),
            });
        }
        let resource = self.address(&mut state, name);
        state.public_ips.insert(name.to_string(), resource.clone());
        Ok(resource)
    }

    async fn delete_public_ip(&self, name: &str) -> Result<(), NetworkError> {
        let id = self.scope.public_ip_id(name);
        let mut state = self.state.lock().unwrap();
        state.calls.public_ip_deletes += 1;

        let in_use = state
            .load_balancer
            .properties
            .frontend_ip_configurations
            .iter()
            .any(|f| references(f, &id));
        if in_use {
            return Err(NetworkError::Api {
                status: 400,
                code: "PublicIPAddressInUse".to_string(),
                message: format!("{name} is referenced by a frontend IP configuration"),
            });
        }
        state.public_ips.remove(name);
        Ok(())
    }

    async fn list_public_ips(&self) -> Result<Vec<PublicIpAddress>, NetworkError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .public_ips
            .values()
            .cloned()
            .collect())
    }

    async fn get_load_balancer(&self, name: &str) -> Result<LoadBalancer, NetworkError> {
        let load_balancer = {
            let mut state = self.state.lock().unwrap();
            state.calls.load_balancer_reads += 1;
            if state.load_balancer.name != name {
                return Err(NetworkError::NotFound(name.to_string()));
            }
            let mut load_balancer = state.load_balancer.clone();
            load_balancer.etag = Some(etag(state.version));
            if state.writes_after_next_reads > 0 {
                state.writes_after_next_reads -= 1;
                state.version += 1;
            }
            load_balancer
        };
        tokio::task::yield_now().await;
        Ok(load_balancer)
    }

    async fn update_load_balancer(
        &self,
        load_balancer: &LoadBalancer,
    ) -> Result<LoadBalancer, NetworkError> {
        let mut state = self.state.lock().unwrap();
        state.calls.load_balancer_writes += 1;

        if state.reject_lb_updates {
            return Err(NetworkError::Conflict(
                "AnotherOperationInProgress: injected".to_string(),
            ));
        }
        if state.fail_next_lb_updates > 0 {
            state.fail_next_lb_updates -= 1;
            return Err(NetworkError::Conflict(
                "RetryableError: injected".to_string(),
            ));
        }
        if let Some(tag) = &load_balancer.etag {
            if *tag != etag(state.version) {
                return Err(NetworkError::Conflict(format!(
                    "PreconditionFailed: etag {tag} is stale"
                )));
            }
        }

        let mut stored = load_balancer.clone();
        stored.etag = None;
        state.load_balancer = stored;
        state.version += 1;

        if state.fail_next_lb_provisioning > 0 {
            state.fail_next_lb_provisioning -= 1;
            return Err(NetworkError::ProvisioningFailed {
                resource: load_balancer.name.clone(),
                state: "Failed".to_string(),
            });
        }

        let mut returned = state.load_balancer.clone();
        returned.etag = Some(etag(state.version));
        Ok(returned)
    }
}
