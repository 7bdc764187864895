pub mod config;
pub mod features;
pub mod runtime;
pub mod shared;

use corral_core::{Instance, InstanceEvent, InstanceStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use config::LifecycleConfig;
use features::instance_lifecycle::controller::InstanceManager;
use features::instance_lifecycle::repo::EventStore;
use features::instance_lifecycle::service::InstanceState;
use runtime::{RuntimeDriver, StopOptions};
use shared::error::{AgentError, AgentResult};

/// Node Agent owns the lifecycle controller of every instance placed on this node
pub struct NodeAgent {
    node_id: String,
    store: Arc<dyn EventStore>,
    runtime: Arc<dyn RuntimeDriver>,
    lifecycle: LifecycleConfig,
    instances: Arc<RwLock<HashMap<String, Arc<InstanceManager>>>>,
}

impl NodeAgent {
    pub fn new(
        node_id: impl Into<String>,
        store: Arc<dyn EventStore>,
        runtime: Arc<dyn RuntimeDriver>,
        lifecycle: LifecycleConfig,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            store,
            runtime,
            lifecycle,
            instances: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Record a new instance and prepare it in the background
    pub async fn create_instance(&self, instance: Instance) -> AgentResult<()> {
        corral_core::validate_instance_id(&instance.id)?;
        let instance_id = instance.id.clone();

        let mut instances = self.instances.write().await;
        // Ids are never reused, even once the instance is destroyed.
        if instances.contains_key(&instance_id) || !self.store.load(&instance_id).await?.is_empty()
        {
            return Err(AgentError::InstanceAlreadyExists(instance_id));
        }

        let state = InstanceState::create(self.store.clone(), instance).await?;
        let manager = self.register(&mut instances, state);
        drop(instances);

        info!(node_id = %self.node_id, instance_id = %instance_id, "instance created");
        tokio::spawn(async move {
            if let Err(error) = manager.prepare().await {
                warn!(instance_id = %manager.id(), error = %error, "instance preparation failed");
            }
        });
        Ok(())
    }

    pub async fn destroy_instance(&self, instance_id: &str, force: bool) -> AgentResult<()> {
        self.manager(instance_id).await?.destroy(force).await
    }

    pub async fn start_instance(&self, instance_id: &str) -> AgentResult<()> {
        self.manager(instance_id).await?.start().await
    }

    pub async fn stop_instance(&self, instance_id: &str, options: StopOptions) -> AgentResult<()> {
        self.manager(instance_id).await?.stop(options).await
    }

    pub async fn get_instance_status(&self, instance_id: &str) -> AgentResult<InstanceStatus> {
        Ok(self.manager(instance_id).await?.status())
    }

    pub async fn get_instance(&self, instance_id: &str) -> AgentResult<Instance> {
        Ok(self.manager(instance_id).await?.instance())
    }

    /// Get the recorded lifecycle events of an instance, oldest first
    pub async fn get_instance_events(&self, instance_id: &str) -> AgentResult<Vec<InstanceEvent>> {
        self.manager(instance_id).await?.state().events().await
    }

    /// List known instance ids, sorted
    pub async fn list_instances(&self) -> Vec<String> {
        let instances = self.instances.read().await;
        let mut ids: Vec<String> = instances.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Rebuild controllers from the event log after a restart and resume
    /// every interrupted transition. Returns the number of instances resumed.
    ///
    /// Instances whose log cannot be replayed are logged and skipped so one
    /// bad log does not keep the rest of the node down.
    pub async fn recover(&self) -> AgentResult<usize> {
        let instance_ids = self.store.list_instances().await?;
        let mut instances = self.instances.write().await;
        let mut resumed = 0;

        for instance_id in instance_ids {
            if instances.contains_key(&instance_id) {
                continue;
            }

            let state = match InstanceState::load(self.store.clone(), &instance_id).await {
                Ok(state) => state,
                Err(error) => {
                    error!(instance_id = %instance_id, error = %error, "failed to replay instance log");
                    continue;
                }
            };
            if state.status() == InstanceStatus::Destroyed {
                continue;
            }

            let manager = self.register(&mut instances, state);
            tokio::spawn(async move {
                if let Err(error) = manager.recover().await {
                    error!(instance_id = %manager.id(), error = %error, "instance recovery failed");
                }
            });
            resumed += 1;
        }

        info!(node_id = %self.node_id, resumed, "instances recovered");
        Ok(resumed)
    }

    fn register(
        &self,
        instances: &mut HashMap<String, Arc<InstanceManager>>,
        state: InstanceState,
    ) -> Arc<InstanceManager> {
        let manager = Arc::new(InstanceManager::new(
            Arc::new(state),
            self.runtime.clone(),
            self.lifecycle.clone(),
        ));
        instances.insert(manager.id().to_string(), manager.clone());
        manager
    }

    async fn manager(&self, instance_id: &str) -> AgentResult<Arc<InstanceManager>> {
        let instances = self.instances.read().await;
        instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| AgentError::InstanceNotFound(instance_id.to_string()))
    }
}
