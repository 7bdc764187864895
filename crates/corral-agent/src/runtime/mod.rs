//! Contract between instance controllers and the VM backend.
//!
//! A controller serializes every driver call for its instance, so
//! implementations only need to tolerate concurrent calls for *different*
//! instances.

pub mod simulated;

use async_trait::async_trait;
use corral_core::{Instance, LocalConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use simulated::SimulatedRuntime;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("invalid instance configuration: {0}")]
    InvalidConfig(String),
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("vm not found: {0}")]
    NotFound(String),
    #[error("vm error: {0}")]
    Vm(String),
}

impl RuntimeError {
    /// A fatal error cannot succeed on retry with the same input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RuntimeError::InvalidConfig(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub local: LocalConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// Signal delivered to the guest init; the driver picks its default when unset.
    pub signal: Option<String>,
    pub grace_period: Option<Duration>,
}

impl StopOptions {
    pub fn new(signal: impl Into<String>, grace_period: Duration) -> Self {
        Self {
            signal: Some(signal.into()),
            grace_period: Some(grace_period),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmExit {
    pub exit_code: Option<i32>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Allocate and configure everything the VM needs before it can boot.
    async fn prepare_instance(
        &self,
        instance: &Instance,
        network: &NetworkConfig,
    ) -> Result<(), RuntimeError>;

    async fn start_vm(&self, instance_id: &str) -> Result<(), RuntimeError>;

    /// Resolves once the VM has exited.
    async fn wait_vm(&self, instance_id: &str) -> Result<VmExit, RuntimeError>;

    async fn stop_vm(&self, instance_id: &str, options: &StopOptions)
        -> Result<(), RuntimeError>;

    /// Release every backend resource held by the instance.
    async fn destroy_instance(&self, instance_id: &str) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_invalid_config_is_fatal() {
        assert!(RuntimeError::InvalidConfig("bad image".to_string()).is_fatal());
        assert!(!RuntimeError::ResourceUnavailable("no memory".to_string()).is_fatal());
        assert!(!RuntimeError::NotFound("vm-1".to_string()).is_fatal());
        assert!(!RuntimeError::Vm("vmm crashed".to_string()).is_fatal());
    }

    #[test]
    fn test_stop_options_default_is_driver_choice() {
        let options = StopOptions::default();
        assert!(options.signal.is_none());
        assert!(options.grace_period.is_none());

        let options = StopOptions::new("SIGTERM", Duration::from_secs(5));
        assert_eq!(options.signal.as_deref(), Some("SIGTERM"));
        assert_eq!(options.grace_period, Some(Duration::from_secs(5)));
    }
}
