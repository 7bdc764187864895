use corral_core::{InstanceStatus, Origin};
use tracing::{error, info};

use super::{wait_for_exit, InstanceManager, Lifecycle};
use crate::runtime::StopOptions;
use crate::shared::error::{AgentError, AgentResult};

impl InstanceManager {
    /// Destroy the instance. A running instance is only destroyed when
    /// `force` is set, in which case its VM is stopped first and the call
    /// waits for the run loop to observe the exit.
    pub async fn destroy(&self, force: bool) -> AgentResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.state.status() == InstanceStatus::Destroyed {
            return Ok(());
        }

        let running = self.is_running();
        if running && !force {
            return Err(AgentError::FailedPrecondition(
                "instance is running".to_string(),
            ));
        }

        if running {
            self.runtime
                .stop_vm(self.id(), &StopOptions::default())
                .await?;
            wait_for_exit(lifecycle.exit_rx.clone()).await;
        }

        self.destroy_impl(&mut lifecycle, Origin::User, force, "requested by user")
            .await
    }

    pub(super) async fn destroy_impl(
        &self,
        lifecycle: &mut Lifecycle,
        origin: Origin,
        force: bool,
        reason: &str,
    ) -> AgentResult<()> {
        // Intent goes to the log first so a crash from here on still ends in
        // a destroyed instance after recovery.
        self.state
            .push_instance_destroy_event(origin, force, reason)
            .await?;
        self.finish_destroy(lifecycle).await
    }

    /// Backend cleanup is best effort; the destroyed event is not.
    pub(super) async fn finish_destroy(&self, lifecycle: &mut Lifecycle) -> AgentResult<()> {
        let instance_id = self.id();
        if let Err(err) = self.runtime.destroy_instance(instance_id).await {
            error!(%instance_id, error = %err, "failed to destroy instance");
        }

        // Backend resources are gone even if the record below fails.
        lifecycle.is_prepared = false;
        lifecycle.exit_rx = None;
        self.state.push_instance_destroyed_event().await?;
        info!(%instance_id, "instance destroyed");
        Ok(())
    }
}
