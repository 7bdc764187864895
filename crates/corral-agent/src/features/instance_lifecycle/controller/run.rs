use corral_core::InstanceStatus;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{wait_for_exit, InstanceManager, Lifecycle};
use crate::runtime::{StopOptions, VmExit};
use crate::shared::error::{AgentError, AgentResult};

impl InstanceManager {
    /// Boot a prepared instance. Starting an instance that is already
    /// running is a no-op.
    pub async fn start(self: &Arc<Self>) -> AgentResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let instance_id = self.id();

        let status = self.state.status();
        if matches!(
            status,
            InstanceStatus::Destroying | InstanceStatus::Destroyed
        ) {
            return Err(AgentError::FailedPrecondition(format!(
                "instance is {status}"
            )));
        }
        if self.is_running() {
            return Ok(());
        }
        if !lifecycle.is_prepared {
            return Err(AgentError::FailedPrecondition(
                "instance is not prepared".to_string(),
            ));
        }

        self.state.push_instance_start_event().await?;
        if let Err(err) = self.runtime.start_vm(instance_id).await {
            if let Err(push_err) = self
                .state
                .push_instance_start_failed_event(&err.to_string())
                .await
            {
                error!(%instance_id, error = %push_err, "failed to push instance start failed event");
                return Err(push_err);
            }
            return Err(err.into());
        }

        let started = self.state.push_instance_started_event().await;
        // The VM is up whether or not the event made it; keep watching it.
        self.watch_vm(&mut lifecycle);
        info!(%instance_id, "instance started");
        started
    }

    /// Ask the VM to shut down and wait until it has exited.
    pub async fn stop(&self, options: StopOptions) -> AgentResult<()> {
        let lifecycle = self.lifecycle.lock().await;

        let status = self.state.status();
        if matches!(
            status,
            InstanceStatus::Destroying | InstanceStatus::Destroyed
        ) {
            return Err(AgentError::FailedPrecondition(format!(
                "instance is {status}"
            )));
        }
        if !self.is_running() {
            return Ok(());
        }

        self.state
            .push_instance_stop_event(options.signal.as_deref(), options.grace_period)
            .await?;
        self.runtime.stop_vm(self.id(), &options).await?;
        wait_for_exit(lifecycle.exit_rx.clone()).await;
        Ok(())
    }

    /// Install a fresh completion signal and spawn the run loop for the
    /// current boot.
    pub(super) fn watch_vm(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        let (exit_tx, exit_rx) = watch::channel(None);
        lifecycle.exit_rx = Some(exit_rx);
        self.is_running.store(true, Ordering::SeqCst);

        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run_loop(exit_tx).await });
    }

    async fn run_loop(&self, exit_tx: watch::Sender<Option<VmExit>>) {
        let instance_id = self.id();
        let exit = match self.runtime.wait_vm(instance_id).await {
            Ok(exit) => exit,
            Err(err) => {
                warn!(%instance_id, error = %err, "lost track of vm, treating it as exited");
                VmExit { exit_code: None }
            }
        };

        if let Err(err) = self.state.push_instance_exited_event(exit.exit_code).await {
            error!(%instance_id, error = %err, "failed to push instance exited event");
        }
        self.is_running.store(false, Ordering::SeqCst);
        exit_tx.send_replace(Some(exit));
        info!(%instance_id, exit_code = ?exit.exit_code, "vm exited");
    }
}
