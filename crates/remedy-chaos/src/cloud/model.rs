//! Typed views of the cloud networking resources the harness touches.
//!
//! The load balancer is a compound aggregate: a write replaces the whole
//! object, and any field left out is removed. Every struct here therefore
//! carries a flattened `extra` map so that properties this crate does not
//! model survive a read-modify-write unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ===== Shared =====

/// Reference to another resource by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResource {
    pub id: String,
}

impl SubResource {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Anything addressable by name inside the load balancer's collections.
pub trait NamedEntry {
    fn name(&self) -> &str;
}

// ===== Public IP addresses =====

/// SKU tier of a public IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublicIpSku {
    Basic,
    Standard,
}

/// Allocation method of a public IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpAllocationMethod {
    Static,
    Dynamic,
}

/// Creation parameters for a public IP address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIpParameters {
    pub location: String,
    pub sku: PublicIpSku,
    pub allocation_method: IpAllocationMethod,
    pub idle_timeout_minutes: u32,
}

/// Idle timeout applied to every harness-created address.
pub const PUBLIC_IP_IDLE_TIMEOUT_MINUTES: u32 = 4;

impl PublicIpParameters {
    /// Standard SKU, static allocation, four minute idle timeout.
    pub fn standard_static(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            sku: PublicIpSku::Standard,
            allocation_method: IpAllocationMethod::Static,
            idle_timeout_minutes: PUBLIC_IP_IDLE_TIMEOUT_MINUTES,
        }
    }

    /// Request body for a create-or-update call.
    pub fn request_body(&self) -> Value {
        serde_json::json!({
            "location": self.location,
            "sku": { "name": self.sku },
            "properties": {
                "publicIPAllocationMethod": self.allocation_method,
                "idleTimeoutInMinutes": self.idle_timeout_minutes,
            }
        })
    }
}

/// A public IP address as returned by the cloud API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicIpAddress {
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub properties: PublicIpAddressProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpAddressProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ===== Load balancer =====

/// The load balancer aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<Value>,
    /// Version tag of the read this object came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub properties: LoadBalancerProperties,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The collections of the aggregate. Only the three harness-managed
/// collections are typed; pools, NAT rules and outbound rules are carried
/// as opaque JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerProperties {
    #[serde(rename = "frontendIPConfigurations", default)]
    pub frontend_ip_configurations: Vec<FrontendIpConfiguration>,
    #[serde(default)]
    pub backend_address_pools: Vec<Value>,
    #[serde(default)]
    pub load_balancing_rules: Vec<LoadBalancingRule>,
    #[serde(default)]
    pub probes: Vec<Probe>,
    #[serde(default)]
    pub inbound_nat_rules: Vec<Value>,
    #[serde(default)]
    pub outbound_rules: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontendIpConfiguration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: FrontendIpConfigurationProperties,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontendIpConfigurationProperties {
    #[serde(
        rename = "privateIPAllocationMethod",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub private_ip_allocation_method: Option<IpAllocationMethod>,
    #[serde(
        rename = "publicIPAddress",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub public_ip_address: Option<SubResource>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancingRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: LoadBalancingRuleProperties,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancingRuleProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_in_minutes: Option<u32>,
    #[serde(
        rename = "enableFloatingIP",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub enable_floating_ip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_distribution: Option<String>,
    #[serde(
        rename = "frontendIPConfiguration",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub frontend_ip_configuration: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_address_pool: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<SubResource>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: ProbeProperties,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_in_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_probes: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NamedEntry for FrontendIpConfiguration {
    fn name(&self) -> &str {
        &self.name
    }
}

impl NamedEntry for LoadBalancingRule {
    fn name(&self) -> &str {
        &self.name
    }
}

impl NamedEntry for Probe {
    fn name(&self) -> &str {
        &self.name
    }
}

impl LoadBalancer {
    /// Empty aggregate, used when seeding fakes.
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            location: location.into(),
            sku: None,
            etag: None,
            resource_type: None,
            properties: LoadBalancerProperties::default(),
            extra: Map::new(),
        }
    }
}
