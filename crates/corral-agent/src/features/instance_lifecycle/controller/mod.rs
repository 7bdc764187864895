//! Per-instance lifecycle controller.
//!
//! Every public operation holds the instance lock for its whole duration,
//! including driver calls, prepare backoff and the wait for a VM to stop, so
//! at most one transition is in flight per instance. The only work done
//! outside the lock is the auto-start after a successful prepare and the run
//! loop that watches a booted VM.

mod destroy;
mod prepare;
mod run;

use corral_core::{Instance, InstanceStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::config::LifecycleConfig;
use crate::features::instance_lifecycle::service::InstanceState;
use crate::runtime::{RuntimeDriver, VmExit};
use crate::shared::error::AgentResult;

/// State owned by whoever holds the instance lock.
#[derive(Debug, Default)]
struct Lifecycle {
    is_prepared: bool,
    /// Completion signal of the current boot, fulfilled by its run loop.
    exit_rx: Option<watch::Receiver<Option<VmExit>>>,
}

pub struct InstanceManager {
    state: Arc<InstanceState>,
    runtime: Arc<dyn RuntimeDriver>,
    config: LifecycleConfig,
    lifecycle: Mutex<Lifecycle>,
    // Written by the run loop without the lock.
    is_running: AtomicBool,
}

impl InstanceManager {
    pub fn new(
        state: Arc<InstanceState>,
        runtime: Arc<dyn RuntimeDriver>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            state,
            runtime,
            config,
            lifecycle: Mutex::new(Lifecycle::default()),
            is_running: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        self.state.id()
    }

    pub fn status(&self) -> InstanceStatus {
        self.state.status()
    }

    pub fn instance(&self) -> Instance {
        self.state.instance()
    }

    pub fn state(&self) -> &Arc<InstanceState> {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Waits for any in-flight transition to finish.
    pub async fn is_prepared(&self) -> bool {
        self.lifecycle.lock().await.is_prepared
    }

    /// Rebuild in-memory flags from the projection after an agent restart and
    /// resume whatever transition was interrupted.
    pub async fn recover(self: &Arc<Self>) -> AgentResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let status = self.state.status();
        info!(instance_id = %self.id(), %status, "recovering instance");

        match status {
            InstanceStatus::Created | InstanceStatus::Preparing => {
                self.prepare_locked(&mut lifecycle).await
            }
            InstanceStatus::Prepared | InstanceStatus::Starting => {
                lifecycle.is_prepared = true;
                if self.state.instance().desired_status == InstanceStatus::Running {
                    self.spawn_start();
                }
                Ok(())
            }
            InstanceStatus::Stopped => {
                lifecycle.is_prepared = true;
                Ok(())
            }
            InstanceStatus::Running | InstanceStatus::Stopping => {
                lifecycle.is_prepared = true;
                self.watch_vm(&mut lifecycle);
                Ok(())
            }
            InstanceStatus::Destroying => {
                warn!(instance_id = %self.id(), "resuming interrupted destroy");
                self.finish_destroy(&mut lifecycle).await
            }
            InstanceStatus::Destroyed => Ok(()),
        }
    }
}

/// Block until the boot behind `exit_rx` has exited. Returns immediately if
/// the exit was already signalled or the run loop is gone.
async fn wait_for_exit(exit_rx: Option<watch::Receiver<Option<VmExit>>>) -> Option<VmExit> {
    let mut exit_rx = exit_rx?;
    let exit = match exit_rx.wait_for(Option::is_some).await {
        Ok(exit) => *exit,
        Err(_) => None,
    };
    exit
}
