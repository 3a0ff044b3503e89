//! Public IP address lifecycle.

use crate::cloud::model::{PublicIpAddress, PublicIpParameters};
use crate::cloud::NetworkApi;
use crate::errors::NetworkError;
use crate::identity::{derive_name, ResourceSuffix, DEFAULT_SUFFIX_LENGTH, PUBLIC_IP_PREFIX};
use std::sync::Arc;
use tracing::{info, instrument};

/// A harness-created public IP address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIp {
    pub name: String,
    pub id: String,
    /// Cloud-assigned address, if the API reported one.
    pub address: Option<String>,
    pub suffix: ResourceSuffix,
}

impl PublicIp {
    fn from_resource(resource: PublicIpAddress, suffix: ResourceSuffix) -> Self {
        Self {
            name: resource.name,
            id: resource.id,
            address: resource.properties.ip_address,
            suffix,
        }
    }
}

/// Creates, deletes and discovers `ip-` addresses in one resource group.
pub struct PublicIpManager {
    network: Arc<dyn NetworkApi>,
    location: String,
}

impl PublicIpManager {
    pub fn new(network: Arc<dyn NetworkApi>, location: impl Into<String>) -> Self {
        Self {
            network,
            location: location.into(),
        }
    }

    /// Create `count` addresses one after another, each with a fresh suffix.
    ///
    /// A failure stops the batch and propagates; addresses created before it
    /// are not rolled back and are left for [`cleanup_all`](Self::cleanup_all).
    #[instrument(skip_all, fields(count = count))]
    pub async fn create(&self, count: usize) -> Result<Vec<PublicIp>, NetworkError> {
        let parameters = PublicIpParameters::standard_static(self.location.clone());
        let mut created = Vec::with_capacity(count);

        for _ in 0..count {
            let suffix = ResourceSuffix::generate(DEFAULT_SUFFIX_LENGTH);
            let name = derive_name(PUBLIC_IP_PREFIX, &suffix);

            let resource = self.network.create_public_ip(&name, &parameters).await?;
            let ip = PublicIp::from_resource(resource, suffix);

            info!(
                target: "remedy_chaos.public_ip",
                name = %ip.name,
                address = ip.address.as_deref().unwrap_or("<none>"),
                "Created public IP"
            );
            created.push(ip);
        }

        Ok(created)
    }

    pub async fn delete(&self, ip: &PublicIp) -> Result<(), NetworkError> {
        self.network.delete_public_ip(&ip.name).await?;
        info!(target: "remedy_chaos.public_ip", name = %ip.name, "Deleted public IP");
        Ok(())
    }

    /// Every address in the resource group whose name starts with `ip-`.
    ///
    /// This cannot tell which run created an address; it relies on nothing
    /// else using the prefix.
    pub async fn discover_orphans(&self) -> Result<Vec<PublicIp>, NetworkError> {
        let orphans = self
            .network
            .list_public_ips()
            .await?
            .into_iter()
            .filter(|resource| resource.name.starts_with(PUBLIC_IP_PREFIX))
            .filter_map(|resource| {
                let suffix = ResourceSuffix::from_resource_name(&resource.name)?;
                Some(PublicIp::from_resource(resource, suffix))
            })
            .collect();
        Ok(orphans)
    }

    /// Delete everything [`discover_orphans`](Self::discover_orphans) finds.
    /// Returns the number of addresses deleted.
    #[instrument(skip_all)]
    pub async fn cleanup_all(&self) -> Result<usize, NetworkError> {
        let orphans = self.discover_orphans().await?;
        for ip in &orphans {
            self.delete(ip).await?;
        }

        info!(
            target: "remedy_chaos.public_ip",
            deleted = orphans.len(),
            "Public IP cleanup complete"
        );
        Ok(orphans.len())
    }
}
