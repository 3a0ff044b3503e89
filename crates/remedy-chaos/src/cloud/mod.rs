//! Cloud networking API seam.
//!
//! The managers only talk to [`NetworkApi`]; production uses
//! [`arm::ArmNetworkClient`], tests use an in-memory fake.

pub mod arm;
pub mod model;

use crate::errors::NetworkError;
use model::{LoadBalancer, PublicIpAddress, PublicIpParameters};

/// Public IP and load-balancer operations scoped to one resource group.
///
/// All calls block until the cloud operation has completed.
#[async_trait::async_trait]
pub trait NetworkApi: Send + Sync {
    async fn create_public_ip(
        &self,
        name: &str,
        parameters: &PublicIpParameters,
    ) -> Result<PublicIpAddress, NetworkError>;

    async fn delete_public_ip(&self, name: &str) -> Result<(), NetworkError>;

    async fn list_public_ips(&self) -> Result<Vec<PublicIpAddress>, NetworkError>;

    async fn get_load_balancer(&self, name: &str) -> Result<LoadBalancer, NetworkError>;

    /// Replace the whole aggregate. If `load_balancer.etag` is set the write
    /// is conditional on it and fails with [`NetworkError::Conflict`] when the
    /// aggregate changed since that read.
    async fn update_load_balancer(
        &self,
        load_balancer: &LoadBalancer,
    ) -> Result<LoadBalancer, NetworkError>;
}

/// Subscription, resource group and region the harness operates in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScope {
    pub subscription_id: String,
    pub resource_group: String,
    pub location: String,
}

impl ResourceScope {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            location: location.into(),
        }
    }

    /// `/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Network`
    pub fn network_provider_path(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network",
            self.subscription_id, self.resource_group
        )
    }

    pub fn load_balancer_id(&self, load_balancer: &str) -> String {
        format!(
            "{}/loadBalancers/{load_balancer}",
            self.network_provider_path()
        )
    }

    /// Id of a load-balancer child, which may not exist yet. The cloud API
    /// requires these ids when one new child references another in the same
    /// write.
    pub fn load_balancer_child_id(
        &self,
        load_balancer: &str,
        collection: LoadBalancerCollection,
        name: &str,
    ) -> String {
        format!(
            "{}/{}/{name}",
            self.load_balancer_id(load_balancer),
            collection.path_segment()
        )
    }

    pub fn public_ip_id(&self, name: &str) -> String {
        format!("{}/publicIPAddresses/{name}", self.network_provider_path())
    }
}

/// Child collections of a load balancer that can be referenced by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancerCollection {
    FrontendIpConfigurations,
    BackendAddressPools,
    LoadBalancingRules,
    Probes,
}

impl LoadBalancerCollection {
    pub fn path_segment(self) -> &'static str {
        match self {
            LoadBalancerCollection::FrontendIpConfigurations => "frontendIPConfigurations",
            LoadBalancerCollection::BackendAddressPools => "backendAddressPools",
            LoadBalancerCollection::LoadBalancingRules => "loadBalancingRules",
            LoadBalancerCollection::Probes => "probes",
        }
    }
}
