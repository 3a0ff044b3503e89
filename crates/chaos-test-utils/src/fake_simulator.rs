//! VM failure simulator that records the targeted VM and makes the fake
//! cluster report reapply attempts for it.

use crate::fake_cluster::FakeCluster;
use remedy_chaos::errors::HarnessError;
use remedy_chaos::failed_vm::VmFailureSimulator;
use remedy_chaos::objects::REAPPLY_VM_OPERATION;
use serde_json::json;
use std::sync::{Arc, Mutex};

pub struct FakeVmSimulator {
    cluster: Arc<FakeCluster>,
    namespace: String,
    /// Attempts the "controller" reports; `None` leaves the VM untouched.
    attempts: Option<u32>,
    started: Mutex<Vec<String>>,
}

impl FakeVmSimulator {
    pub fn new(cluster: Arc<FakeCluster>, namespace: &str, attempts: Option<u32>) -> Self {
        Self {
            cluster,
            namespace: namespace.to_string(),
            attempts,
            started: Mutex::new(Vec::new()),
        }
    }

    /// VMs the simulator was started against.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl VmFailureSimulator for FakeVmSimulator {
    async fn start(&self, vm_name: &str) -> Result<(), HarnessError> {
        self.started.lock().unwrap().push(vm_name.to_string());
        if let Some(attempts) = self.attempts {
            self.cluster.set_failed_operations(
                &self.namespace,
                vm_name,
                json!([{
                    "type": REAPPLY_VM_OPERATION,
                    "attempts": attempts,
                    "errorMessage": "simulated VM failure",
                }]),
            );
        }
        Ok(())
    }
}
