//! Failed-VM remediation check.
//!
//! One node of a dedicated worker pool is pushed into a failed state by an
//! external simulator. The controller is expected to retry reapplying the VM
//! a fixed number of times, which it records on the node's `VirtualMachine`
//! object as a single `ReapplyVirtualMachine` failed operation.

use crate::config::FailedVmConfig;
use crate::errors::{ClusterError, HarnessError};
use crate::objects::{FailedOperation, ObjectManager, REAPPLY_VM_OPERATION};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Make target that starts the simulator against `VM_NAME`.
pub const SIMULATOR_MAKE_TARGET: &str = "start-failedvm-simulator-azure";

/// Puts a VM into a failed state.
#[async_trait]
pub trait VmFailureSimulator: Send + Sync {
    async fn start(&self, vm_name: &str) -> Result<(), HarnessError>;
}

/// Runs the simulator through the controller repository's Makefile.
#[derive(Debug, Clone)]
pub struct MakeSimulator {
    repo_dir: PathBuf,
}

impl MakeSimulator {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    fn args(&self, vm_name: &str) -> Vec<OsString> {
        vec![
            format!("VM_NAME={vm_name}").into(),
            "-C".into(),
            self.repo_dir.clone().into(),
            SIMULATOR_MAKE_TARGET.into(),
        ]
    }
}

#[async_trait]
impl VmFailureSimulator for MakeSimulator {
    async fn start(&self, vm_name: &str) -> Result<(), HarnessError> {
        let output = Command::new("make")
            .args(self.args(vm_name))
            .output()
            .await
            .map_err(|e| HarnessError::Simulator(format!("Failed to run make: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(HarnessError::Simulator(format!(
                "make exited with {}: {stderr}",
                output.status
            )));
        }
        info!(target: "remedy_chaos.failed_vm", vm = %vm_name, "Started VM failure simulator");
        Ok(())
    }
}

pub struct FailedVmCheck {
    objects: ObjectManager,
    simulator: Arc<dyn VmFailureSimulator>,
}

impl FailedVmCheck {
    pub fn new(objects: ObjectManager, simulator: Arc<dyn VmFailureSimulator>) -> Self {
        Self { objects, simulator }
    }

    /// Fail a random VM of the worker pool, observe the controller for the
    /// configured duration and report whether it made exactly the required
    /// number of reapply attempts.
    ///
    /// Returns `Ok(false)` if the worker pool has no nodes.
    #[instrument(skip_all, fields(worker_group = %config.worker_group))]
    pub async fn run(&self, config: &FailedVmConfig) -> Result<bool, HarnessError> {
        let nodes = self.objects.node_names(&config.worker_group).await?;
        let chosen = {
            let mut rng = rand::thread_rng();
            nodes.choose(&mut rng).cloned()
        };
        let Some(vm_name) = chosen else {
            warn!(
                target: "remedy_chaos.failed_vm",
                worker_group = %config.worker_group,
                "Could not find a VM belonging to the worker group"
            );
            return Ok(false);
        };

        self.simulator.start(&vm_name).await?;

        let deadline = Instant::now() + config.run_duration;
        let mut attempts = 0;
        while Instant::now() < deadline {
            if let Some(observed) = self.reapply_attempts(&vm_name, &config.namespace).await? {
                attempts = observed;
            }
            tokio::time::sleep(config.check_interval).await;
        }

        if attempts != config.required_attempts {
            warn!(
                target: "remedy_chaos.failed_vm",
                vm = %vm_name,
                found = attempts,
                expected = config.required_attempts,
                "VM remediation did not make the expected number of reapply attempts"
            );
            return Ok(false);
        }

        info!(
            target: "remedy_chaos.failed_vm",
            vm = %vm_name,
            attempts,
            "VM remediation made the expected number of reapply attempts"
        );
        Ok(true)
    }

    /// Attempts of the VM's reapply failed operation, if there is one yet.
    async fn reapply_attempts(
        &self,
        vm_name: &str,
        namespace: &str,
    ) -> Result<Option<u32>, HarnessError> {
        let operations = match self
            .objects
            .virtual_machine_failed_operations(vm_name, namespace)
            .await
        {
            Ok(operations) => operations,
            Err(e) if e.is_not_found() => {
                debug!(target: "remedy_chaos.failed_vm", vm = %vm_name, "No virtual machine object yet");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        single_reapply_attempts(vm_name, &operations)
    }
}

fn single_reapply_attempts(
    vm_name: &str,
    operations: &[FailedOperation],
) -> Result<Option<u32>, HarnessError> {
    let reapply: Vec<&FailedOperation> = operations
        .iter()
        .filter(|op| op.operation_type == REAPPLY_VM_OPERATION)
        .collect();

    match reapply.as_slice() {
        [] => Ok(None),
        [op] => Ok(Some(op.attempts)),
        _ => Err(ClusterError::InvalidObject(format!(
            "{vm_name}: more than one {REAPPLY_VM_OPERATION} failed operation"
        ))
        .into()),
    }
}
