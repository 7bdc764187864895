use async_trait::async_trait;
use corral_core::Instance;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use super::{NetworkConfig, RuntimeDriver, RuntimeError, StopOptions, VmExit};

const SIGKILL_EXIT_CODE: i32 = 137;

struct SimulatedVm {
    network: NetworkConfig,
    running: bool,
    exit_tx: watch::Sender<Option<VmExit>>,
}

/// In-process stand-in for a hypervisor driver.
///
/// VMs are plain records; a VM "runs" until it is stopped, destroyed or
/// exited through [`SimulatedRuntime::exit_vm`]. Prepare and destroy failures
/// can be scripted to exercise the controller's retry and cleanup paths.
#[derive(Default)]
pub struct SimulatedRuntime {
    vms: Mutex<HashMap<String, SimulatedVm>>,
    prepare_failures: Mutex<VecDeque<RuntimeError>>,
    destroy_failure: Mutex<Option<RuntimeError>>,
    calls: Mutex<Vec<String>>,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue errors returned by the next `prepare_instance` calls, in order.
    pub async fn fail_prepare_with(&self, errors: impl IntoIterator<Item = RuntimeError>) {
        self.prepare_failures.lock().await.extend(errors);
    }

    pub async fn fail_destroy_with(&self, error: RuntimeError) {
        *self.destroy_failure.lock().await = Some(error);
    }

    /// Simulate the guest exiting on its own.
    pub async fn exit_vm(&self, instance_id: &str, exit_code: i32) -> Result<(), RuntimeError> {
        let mut vms = self.vms.lock().await;
        let vm = vms
            .get_mut(instance_id)
            .ok_or_else(|| RuntimeError::NotFound(instance_id.to_string()))?;
        vm.running = false;
        vm.exit_tx.send_replace(Some(VmExit {
            exit_code: Some(exit_code),
        }));
        Ok(())
    }

    pub async fn is_running(&self, instance_id: &str) -> bool {
        let vms = self.vms.lock().await;
        vms.get(instance_id).map(|vm| vm.running).unwrap_or(false)
    }

    pub async fn network_of(&self, instance_id: &str) -> Option<NetworkConfig> {
        let vms = self.vms.lock().await;
        vms.get(instance_id).map(|vm| vm.network)
    }

    /// Number of calls made to `operation` (e.g. `"prepare_instance"`) for an instance.
    pub async fn call_count(&self, operation: &str, instance_id: &str) -> usize {
        let expected = format!("{operation}:{instance_id}");
        let calls = self.calls.lock().await;
        calls.iter().filter(|call| **call == expected).count()
    }

    async fn record(&self, operation: &str, instance_id: &str) {
        debug!(%instance_id, operation, "simulated runtime call");
        self.calls
            .lock()
            .await
            .push(format!("{operation}:{instance_id}"));
    }
}

fn validate_config(instance: &Instance) -> Result<(), RuntimeError> {
    if instance.config.image.is_empty() {
        return Err(RuntimeError::InvalidConfig("image cannot be empty".to_string()));
    }
    if instance.config.vcpus == 0 {
        return Err(RuntimeError::InvalidConfig(
            "at least one vcpu is required".to_string(),
        ));
    }
    if instance.config.memory_mb == 0 {
        return Err(RuntimeError::InvalidConfig(
            "memory must be greater than zero".to_string(),
        ));
    }
    for entry in &instance.config.env {
        match entry.split_once('=') {
            Some((key, _)) if !key.is_empty() && !key.contains(char::is_whitespace) => {}
            _ => {
                return Err(RuntimeError::InvalidConfig(format!(
                    "malformed environment entry '{entry}', expected KEY=VALUE"
                )))
            }
        }
    }
    Ok(())
}

#[async_trait]
impl RuntimeDriver for SimulatedRuntime {
    async fn prepare_instance(
        &self,
        instance: &Instance,
        network: &NetworkConfig,
    ) -> Result<(), RuntimeError> {
        self.record("prepare_instance", &instance.id).await;

        if let Some(error) = self.prepare_failures.lock().await.pop_front() {
            return Err(error);
        }
        validate_config(instance)?;

        let (exit_tx, _) = watch::channel(None);
        self.vms.lock().await.insert(
            instance.id.clone(),
            SimulatedVm {
                network: *network,
                running: false,
                exit_tx,
            },
        );
        info!(instance_id = %instance.id, guest_ip = %network.local.guest_ip, "simulated vm prepared");
        Ok(())
    }

    async fn start_vm(&self, instance_id: &str) -> Result<(), RuntimeError> {
        self.record("start_vm", instance_id).await;

        let mut vms = self.vms.lock().await;
        let vm = vms
            .get_mut(instance_id)
            .ok_or_else(|| RuntimeError::NotFound(instance_id.to_string()))?;
        if vm.running {
            return Err(RuntimeError::Vm(format!("{instance_id} is already running")));
        }

        // Every boot gets a fresh exit channel so waiters never see a stale exit.
        let (exit_tx, _) = watch::channel(None);
        vm.exit_tx = exit_tx;
        vm.running = true;
        Ok(())
    }

    async fn wait_vm(&self, instance_id: &str) -> Result<VmExit, RuntimeError> {
        let mut exit_rx = {
            let vms = self.vms.lock().await;
            let vm = vms
                .get(instance_id)
                .ok_or_else(|| RuntimeError::NotFound(instance_id.to_string()))?;
            vm.exit_tx.subscribe()
        };

        let exit = *exit_rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| RuntimeError::Vm(format!("{instance_id} exit channel closed")))?;
        exit.ok_or_else(|| RuntimeError::Vm(format!("{instance_id} exited without status")))
    }

    async fn stop_vm(
        &self,
        instance_id: &str,
        options: &StopOptions,
    ) -> Result<(), RuntimeError> {
        self.record("stop_vm", instance_id).await;

        let mut vms = self.vms.lock().await;
        let vm = vms
            .get_mut(instance_id)
            .ok_or_else(|| RuntimeError::NotFound(instance_id.to_string()))?;
        if !vm.running {
            return Ok(());
        }

        let exit_code = match options.signal.as_deref() {
            Some("SIGKILL") | None => SIGKILL_EXIT_CODE,
            Some(_) => 0,
        };
        vm.running = false;
        vm.exit_tx.send_replace(Some(VmExit {
            exit_code: Some(exit_code),
        }));
        Ok(())
    }

    async fn destroy_instance(&self, instance_id: &str) -> Result<(), RuntimeError> {
        self.record("destroy_instance", instance_id).await;

        if let Some(error) = self.destroy_failure.lock().await.take() {
            return Err(error);
        }

        if let Some(vm) = self.vms.lock().await.remove(instance_id) {
            if vm.running {
                vm.exit_tx.send_replace(Some(VmExit {
                    exit_code: Some(SIGKILL_EXIT_CODE),
                }));
            }
        }
        Ok(())
    }
}
