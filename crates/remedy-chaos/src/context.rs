//! Handles shared by every component of one harness run.

use crate::cloud::{NetworkApi, ResourceScope};
use crate::cluster::ClusterApi;
use crate::leak::LeakDetector;
use crate::load_balancer::LoadBalancerManager;
use crate::objects::ObjectManager;
use crate::public_ip::PublicIpManager;
use std::sync::Arc;

/// The managers of one run, built once and shared by reference (or `Arc`
/// across actor tasks).
pub struct ChaosContext {
    pub scope: ResourceScope,
    pub public_ips: PublicIpManager,
    pub load_balancer: LoadBalancerManager,
    pub objects: ObjectManager,
}

impl ChaosContext {
    pub fn new(
        network: Arc<dyn NetworkApi>,
        cluster: Arc<dyn ClusterApi>,
        scope: ResourceScope,
    ) -> Self {
        Self {
            public_ips: PublicIpManager::new(Arc::clone(&network), scope.location.clone()),
            load_balancer: LoadBalancerManager::new(network, scope.clone()),
            objects: ObjectManager::new(cluster),
            scope,
        }
    }

    pub fn leak_detector(&self) -> LeakDetector<'_> {
        LeakDetector::new(&self.public_ips, &self.load_balancer)
    }
}
