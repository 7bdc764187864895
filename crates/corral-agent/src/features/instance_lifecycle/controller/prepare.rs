use corral_core::{InstanceStatus, Origin};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{InstanceManager, Lifecycle};
use crate::runtime::{NetworkConfig, RuntimeError};
use crate::shared::error::{AgentError, AgentResult};

const REASON_FATAL: &str = "instance preparation failed and is unrecoverable";
const REASON_EXHAUSTED: &str = "instance preparation failed after maximum retries";

impl InstanceManager {
    /// Prepare the instance's backend resources, retrying transient driver
    /// failures. On success the instance is started in the background when
    /// its desired status is running; when preparation gives up the instance
    /// is destroyed and the last driver error is returned.
    pub async fn prepare(self: &Arc<Self>) -> AgentResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.prepare_locked(&mut lifecycle).await
    }

    pub(super) async fn prepare_locked(
        self: &Arc<Self>,
        lifecycle: &mut Lifecycle,
    ) -> AgentResult<()> {
        let instance_id = self.state.id();
        if self.state.status() == InstanceStatus::Destroyed {
            return Ok(());
        }
        info!(%instance_id, "preparing instance");

        // The retry budget lives in the log so it survives agent restarts.
        let mut retries = self.state.last_event().prepare_retries().unwrap_or(0);
        let max_retries = self.config.max_prepare_retries;
        let instance = self.state.instance();
        let network = NetworkConfig {
            local: instance.reservation.local_ipv4_subnet.local_config(),
        };
        let mut last_error: Option<RuntimeError> = None;

        while retries < max_retries {
            self.state.push_instance_prepare_event(retries).await?;
            retries += 1;

            let err = match self.runtime.prepare_instance(&instance, &network).await {
                Ok(()) => {
                    self.state.push_instance_prepared_event().await?;
                    lifecycle.is_prepared = true;
                    info!(%instance_id, attempts = retries, "instance prepared");

                    if instance.desired_status == InstanceStatus::Running {
                        self.spawn_start();
                    }
                    return Ok(());
                }
                Err(err) => err,
            };

            if let Err(push_err) = self
                .state
                .push_instance_preparation_failed_event(&err.to_string())
                .await
            {
                error!(%instance_id, error = %push_err, "failed to push instance preparation failed event");
                return Err(push_err);
            }

            let fatal = err.is_fatal();
            let more_attempts = retries < max_retries;
            if !fatal && more_attempts {
                warn!(
                    %instance_id,
                    error = %err,
                    retries,
                    backoff_secs = self.config.prepare_backoff.as_secs(),
                    "instance preparation failed, retrying"
                );
            }
            last_error = Some(err);

            if fatal || !more_attempts {
                break;
            }
            tokio::time::sleep(self.config.prepare_backoff).await;
        }

        let fatal = last_error.as_ref().is_some_and(RuntimeError::is_fatal);
        let reason = if fatal { REASON_FATAL } else { REASON_EXHAUSTED };
        warn!(%instance_id, retries, reason, "giving up on instance preparation");

        if let Err(destroy_err) = self
            .destroy_impl(lifecycle, Origin::System, false, reason)
            .await
        {
            error!(%instance_id, error = %destroy_err, "failed to destroy instance after preparation failed");
        }

        Err(match last_error {
            Some(err) => AgentError::Runtime(err),
            None => AgentError::PreparationFailed(reason.to_string()),
        })
    }

    /// Hand the start transition to its own task. It takes the instance lock
    /// once the caller releases it.
    pub(super) fn spawn_start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = manager.start().await {
                warn!(instance_id = %manager.id(), error = %error, "auto-start after prepare failed");
            }
        });
    }
}
