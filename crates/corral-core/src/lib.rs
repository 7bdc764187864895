pub mod events;
pub mod networking;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub use events::{EventPayload, InstanceEvent};
pub use networking::{LocalConfig, LocalIpv4Subnet};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid instance ID: {0}")]
    InvalidInstanceId(String),
    #[error("Invalid subnet: {0}")]
    InvalidSubnet(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Invalid event log: {0}")]
    InvalidEventLog(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Lifecycle status of an instance, projected from its latest event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Created,
    Preparing,
    Prepared,
    Starting,
    Running,
    Stopping,
    Stopped,
    Destroying,
    Destroyed,
}

impl InstanceStatus {
    /// No event may follow a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Destroyed)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Who initiated a transition. Recorded on destroy events for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    User,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub image: String,
    pub vcpus: u32,
    pub memory_mb: u64,
    #[serde(default)]
    pub env: Vec<String>,
}

impl InstanceConfig {
    pub fn new(image: impl Into<String>, vcpus: u32, memory_mb: u64) -> Self {
        Self {
            image: image.into(),
            vcpus,
            memory_mb,
            env: Vec::new(),
        }
    }
}

/// Node-local resources reserved for an instance before its controller exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub local_ipv4_subnet: LocalIpv4Subnet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub desired_status: InstanceStatus,
    pub config: InstanceConfig,
    pub reservation: Reservation,
    pub created_at: DateTime<Utc>,
}

impl Instance {
    /// New instance with a generated id that should end up running.
    pub fn new(config: InstanceConfig, reservation: Reservation) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            desired_status: InstanceStatus::Running,
            config,
            reservation,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_desired_status(mut self, desired_status: InstanceStatus) -> Self {
        self.desired_status = desired_status;
        self
    }
}

/// Instance ids name files in the event log directory, so they are kept to a
/// conservative character set.
pub fn validate_instance_id(instance_id: &str) -> Result<()> {
    if instance_id.is_empty() {
        return Err(CoreError::InvalidInstanceId(
            "Instance ID cannot be empty".to_string(),
        ));
    }

    if !instance_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CoreError::InvalidInstanceId(format!(
            "Instance ID '{}' contains unsupported characters",
            instance_id
        )));
    }

    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
    pub details: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: HashMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<CoreError> for ErrorResponse {
    fn from(err: CoreError) -> Self {
        let code = match &err {
            CoreError::InvalidInstanceId(_) | CoreError::InvalidSubnet(_) => "INVALID_REQUEST",
            CoreError::SerializationError(_) | CoreError::InvalidEventLog(_) => "STORAGE_ERROR",
        };
        ErrorResponse::new(code, err.to_string())
    }
}
