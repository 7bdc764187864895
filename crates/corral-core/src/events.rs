//! Lifecycle events persisted in each instance's log.
//!
//! Events are immutable and appended in causal order. The current status of
//! an instance is always the status projected by its latest event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, Instance, InstanceStatus, Origin, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    InstanceCreated {
        instance: Instance,
    },
    /// A prepare attempt started. `retries` is the number of attempts made
    /// before this one, which lets a restarted agent resume the budget.
    InstancePrepare {
        retries: u32,
    },
    InstancePrepared,
    InstancePreparationFailed {
        reason: String,
    },
    InstanceStart,
    InstanceStartFailed {
        reason: String,
    },
    InstanceStarted,
    InstanceStop {
        signal: Option<String>,
        grace_period_secs: Option<u64>,
    },
    InstanceExited {
        exit_code: Option<i32>,
    },
    InstanceDestroy {
        origin: Origin,
        force: bool,
        reason: String,
    },
    InstanceDestroyed,
}

impl EventPayload {
    pub fn status(&self) -> InstanceStatus {
        match self {
            Self::InstanceCreated { .. } => InstanceStatus::Created,
            Self::InstancePrepare { .. } | Self::InstancePreparationFailed { .. } => {
                InstanceStatus::Preparing
            }
            Self::InstancePrepared | Self::InstanceStartFailed { .. } => InstanceStatus::Prepared,
            Self::InstanceStart => InstanceStatus::Starting,
            Self::InstanceStarted => InstanceStatus::Running,
            Self::InstanceStop { .. } => InstanceStatus::Stopping,
            Self::InstanceExited { .. } => InstanceStatus::Stopped,
            Self::InstanceDestroy { .. } => InstanceStatus::Destroying,
            Self::InstanceDestroyed => InstanceStatus::Destroyed,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InstanceCreated { .. } => "instance_created",
            Self::InstancePrepare { .. } => "instance_prepare",
            Self::InstancePrepared => "instance_prepared",
            Self::InstancePreparationFailed { .. } => "instance_preparation_failed",
            Self::InstanceStart => "instance_start",
            Self::InstanceStartFailed { .. } => "instance_start_failed",
            Self::InstanceStarted => "instance_started",
            Self::InstanceStop { .. } => "instance_stop",
            Self::InstanceExited { .. } => "instance_exited",
            Self::InstanceDestroy { .. } => "instance_destroy",
            Self::InstanceDestroyed => "instance_destroyed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceEvent {
    pub id: Uuid,
    pub instance_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl InstanceEvent {
    pub fn new(instance_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id: instance_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn status(&self) -> InstanceStatus {
        self.payload.status()
    }

    /// Retry counter carried by an `InstancePrepare` event.
    pub fn prepare_retries(&self) -> Option<u32> {
        match self.payload {
            EventPayload::InstancePrepare { retries } => Some(retries),
            _ => None,
        }
    }

    pub fn to_json_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    pub fn from_json_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| CoreError::SerializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstanceConfig, LocalIpv4Subnet, Reservation};
    use std::net::Ipv4Addr;

    fn test_instance() -> Instance {
        Instance::new(
            InstanceConfig::new("alpine:3.19", 1, 128),
            Reservation {
                local_ipv4_subnet: LocalIpv4Subnet::new(Ipv4Addr::new(10, 0, 0, 0)).unwrap(),
            },
        )
        .with_id("vm-1")
    }

    #[test]
    fn test_payload_status_projection() {
        assert_eq!(
            EventPayload::InstancePrepare { retries: 0 }.status(),
            InstanceStatus::Preparing
        );
        assert_eq!(
            EventPayload::InstancePreparationFailed {
                reason: "boom".to_string()
            }
            .status(),
            InstanceStatus::Preparing
        );
        assert_eq!(
            EventPayload::InstanceStartFailed {
                reason: "boom".to_string()
            }
            .status(),
            InstanceStatus::Prepared
        );
        assert_eq!(
            EventPayload::InstanceExited { exit_code: Some(0) }.status(),
            InstanceStatus::Stopped
        );
        assert_eq!(
            EventPayload::InstanceDestroyed.status(),
            InstanceStatus::Destroyed
        );
    }

    #[test]
    fn test_prepare_retries_only_on_prepare_events() {
        let prepare = InstanceEvent::new("vm-1", EventPayload::InstancePrepare { retries: 2 });
        assert_eq!(prepare.prepare_retries(), Some(2));

        let failed = InstanceEvent::new(
            "vm-1",
            EventPayload::InstancePreparationFailed {
                reason: "no capacity".to_string(),
            },
        );
        assert_eq!(failed.prepare_retries(), None);
    }

    #[test]
    fn test_json_line_format() {
        let event = InstanceEvent::new(
            "vm-1",
            EventPayload::InstanceDestroy {
                origin: Origin::System,
                force: false,
                reason: "instance preparation failed after maximum retries".to_string(),
            },
        );
        let line = event.to_json_line().unwrap();
        assert!(!line.contains('\n'));

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["payload"]["type"], "instance_destroy");
        assert_eq!(value["payload"]["origin"], "system");

        let parsed = InstanceEvent::from_json_line(&line).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_created_event_carries_instance() {
        let instance = test_instance();
        let event = InstanceEvent::new(
            &instance.id,
            EventPayload::InstanceCreated {
                instance: instance.clone(),
            },
        );
        let parsed = InstanceEvent::from_json_line(&event.to_json_line().unwrap()).unwrap();
        match parsed.payload {
            EventPayload::InstanceCreated { instance: parsed } => assert_eq!(parsed, instance),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_from_json_line_rejects_garbage() {
        let result = InstanceEvent::from_json_line("{\"id\":");
        assert!(matches!(result, Err(CoreError::SerializationError(_))));
    }
}
