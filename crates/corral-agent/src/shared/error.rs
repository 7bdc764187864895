use corral_core::{CoreError, ErrorResponse};
use std::collections::HashMap;
use thiserror::Error;

use crate::features::instance_lifecycle::repo::StoreError;
use crate::runtime::RuntimeError;

/// Node agent errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),
    #[error("Instance already exists: {0}")]
    InstanceAlreadyExists(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("Instance preparation failed: {0}")]
    PreparationFailed(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<AgentError> for ErrorResponse {
    fn from(err: AgentError) -> Self {
        let code = match &err {
            AgentError::FailedPrecondition(_) => "FAILED_PRECONDITION",
            AgentError::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            AgentError::InstanceAlreadyExists(_) => "INSTANCE_ALREADY_EXISTS",
            AgentError::Storage(_) => "STORAGE_ERROR",
            AgentError::Runtime(_) => "RUNTIME_ERROR",
            AgentError::PreparationFailed(_) => "PREPARATION_FAILED",
            AgentError::Core(core) => return ErrorResponse::from(core.clone()),
        };

        let response = ErrorResponse::new(code, err.to_string());
        match err {
            AgentError::InstanceNotFound(instance_id)
            | AgentError::InstanceAlreadyExists(instance_id) => {
                response.with_details(HashMap::from([("instance_id".to_string(), instance_id)]))
            }
            _ => response,
        }
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;
