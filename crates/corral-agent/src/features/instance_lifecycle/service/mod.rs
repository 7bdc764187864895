//! Event-sourced projection of a single instance.
//!
//! Every `push_*` call appends one event to the durable store and only then
//! folds it into the in-memory snapshot, so readers never observe a
//! transition that was not recorded.

use corral_core::{
    CoreError, EventPayload, Instance, InstanceEvent, InstanceStatus, Origin,
};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::features::instance_lifecycle::repo::EventStore;
use crate::shared::error::{AgentError, AgentResult};

#[derive(Debug, Clone)]
struct Snapshot {
    instance: Instance,
    status: InstanceStatus,
    last_event: InstanceEvent,
}

impl Snapshot {
    fn apply(&mut self, event: InstanceEvent) {
        self.status = event.status();
        self.last_event = event;
    }
}

pub struct InstanceState {
    id: String,
    store: Arc<dyn EventStore>,
    append_lock: Mutex<()>,
    snapshot: RwLock<Snapshot>,
}

impl InstanceState {
    /// Record a new instance and return its projection.
    pub async fn create(store: Arc<dyn EventStore>, instance: Instance) -> AgentResult<Self> {
        corral_core::validate_instance_id(&instance.id)?;

        let event = InstanceEvent::new(
            instance.id.clone(),
            EventPayload::InstanceCreated {
                instance: instance.clone(),
            },
        );
        store.append(&event).await?;

        Ok(Self {
            id: instance.id.clone(),
            store,
            append_lock: Mutex::new(()),
            snapshot: RwLock::new(Snapshot {
                instance,
                status: InstanceStatus::Created,
                last_event: event,
            }),
        })
    }

    /// Rebuild the projection by replaying the instance's log.
    pub async fn load(store: Arc<dyn EventStore>, instance_id: &str) -> AgentResult<Self> {
        let mut events = store.load(instance_id).await?.into_iter();

        let first = events
            .next()
            .ok_or_else(|| AgentError::InstanceNotFound(instance_id.to_string()))?;
        let instance = match &first.payload {
            EventPayload::InstanceCreated { instance } => instance.clone(),
            other => {
                return Err(CoreError::InvalidEventLog(format!(
                    "log of {} starts with {} instead of instance_created",
                    instance_id,
                    other.kind()
                ))
                .into())
            }
        };

        let mut snapshot = Snapshot {
            instance,
            status: first.status(),
            last_event: first,
        };
        for event in events {
            snapshot.apply(event);
        }

        Ok(Self {
            id: instance_id.to_string(),
            store,
            append_lock: Mutex::new(()),
            snapshot: RwLock::new(snapshot),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> InstanceStatus {
        self.read().status
    }

    pub fn instance(&self) -> Instance {
        self.read().instance.clone()
    }

    pub fn last_event(&self) -> InstanceEvent {
        self.read().last_event.clone()
    }

    /// Full history as stored, oldest first.
    pub async fn events(&self) -> AgentResult<Vec<InstanceEvent>> {
        Ok(self.store.load(&self.id).await?)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    async fn push(&self, payload: EventPayload) -> AgentResult<()> {
        let _guard = self.append_lock.lock().await;

        let current = self.status();
        if current.is_terminal() {
            return Err(AgentError::FailedPrecondition(format!(
                "instance {} is {}, cannot record {}",
                self.id,
                current,
                payload.kind()
            )));
        }

        let event = InstanceEvent::new(self.id.clone(), payload);
        self.store.append(&event).await?;
        debug!(instance_id = %self.id, event = event.payload.kind(), "event recorded");

        self.snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(event);
        Ok(())
    }

    pub async fn push_instance_prepare_event(&self, retries: u32) -> AgentResult<()> {
        self.push(EventPayload::InstancePrepare { retries }).await
    }

    pub async fn push_instance_prepared_event(&self) -> AgentResult<()> {
        self.push(EventPayload::InstancePrepared).await
    }

    pub async fn push_instance_preparation_failed_event(&self, reason: &str) -> AgentResult<()> {
        self.push(EventPayload::InstancePreparationFailed {
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn push_instance_start_event(&self) -> AgentResult<()> {
        self.push(EventPayload::InstanceStart).await
    }

    pub async fn push_instance_start_failed_event(&self, reason: &str) -> AgentResult<()> {
        self.push(EventPayload::InstanceStartFailed {
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn push_instance_started_event(&self) -> AgentResult<()> {
        self.push(EventPayload::InstanceStarted).await
    }

    pub async fn push_instance_stop_event(
        &self,
        signal: Option<&str>,
        grace_period: Option<Duration>,
    ) -> AgentResult<()> {
        self.push(EventPayload::InstanceStop {
            signal: signal.map(str::to_string),
            grace_period_secs: grace_period.map(|d| d.as_secs()),
        })
        .await
    }

    pub async fn push_instance_exited_event(&self, exit_code: Option<i32>) -> AgentResult<()> {
        self.push(EventPayload::InstanceExited { exit_code }).await
    }

    pub async fn push_instance_destroy_event(
        &self,
        origin: Origin,
        force: bool,
        reason: &str,
    ) -> AgentResult<()> {
        self.push(EventPayload::InstanceDestroy {
            origin,
            force,
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn push_instance_destroyed_event(&self) -> AgentResult<()> {
        self.push(EventPayload::InstanceDestroyed).await
    }
}
