//! Top-level infrastructure error type.
//!
//! Distinct from [`crate::error_category::ErrorCategory`], which
//! classifies the outcome of a single HTTP request. `CoreError` wraps
//! the failure modes of the surrounding machinery: configuration,
//! object-store access, and worker-pool admission.

use thiserror::Error;

use crate::config::ConfigError;
use crate::object_store::ObjectStoreError;
use crate::pool::PoolError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("workflow error: {0}")]
    Workflow(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts_via_from() {
        let err: CoreError = ConfigError::IncompleteMtls.into();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_pool_error_converts_via_from() {
        let err: CoreError = PoolError::ShuttingDown.into();
        assert!(matches!(err, CoreError::Pool(_)));
    }

    #[test]
    fn test_workflow_error_displays_message() {
        let err = CoreError::Workflow("already running".to_string());
        assert_eq!(err.to_string(), "workflow error: already running");
    }
}
