//! Error types for the BOA core
//!
//! Every public operation fails with exactly one kind from the closed
//! taxonomy below. Validation and state-machine errors surface immediately;
//! locking and already-exists errors are retryable after intervention;
//! execution errors carry the originating plugin name for triage.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Result type alias for BOA operations
pub type BoaResult<T> = Result<T, BoaError>;

/// BOA core error taxonomy
#[derive(Debug, Error)]
pub enum BoaError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Specification load error: {0}")]
    SpecLoad(String),

    #[error("Specification validation failed: {}", errors.join("; "))]
    SpecValidation { errors: Vec<String> },

    #[error("Invalid campaign state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Campaign {campaign_id} is locked by {locked_by} until {expires_at}")]
    CampaignLocked {
        campaign_id: String,
        locked_by: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Decision already exists for iteration {iteration_id}")]
    DecisionAlreadyExists { iteration_id: String },

    #[error("{kind} plugin '{name}' not found. Available: {available:?}")]
    PluginNotFound {
        kind: &'static str,
        name: String,
        available: Vec<String>,
    },

    #[error("Execution error in plugin '{plugin}': {message}")]
    Execution { plugin: String, message: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {0} is already running and cannot be cancelled")]
    JobAlreadyRunning(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<sqlx::Error> for BoaError {
    fn from(err: sqlx::Error) -> Self {
        BoaError::Repository(err.to_string())
    }
}

impl From<serde_json::Error> for BoaError {
    fn from(err: serde_json::Error) -> Self {
        BoaError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for BoaError {
    fn from(err: std::io::Error) -> Self {
        BoaError::Io(err.to_string())
    }
}

/// API error response body
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl BoaError {
    /// Convert to API error code
    pub fn code(&self) -> &'static str {
        match self {
            BoaError::NotFound { .. } => "NOT_FOUND",
            BoaError::Validation(_) => "VALIDATION_ERROR",
            BoaError::SpecLoad(_) => "SPEC_LOAD_ERROR",
            BoaError::SpecValidation { .. } => "SPEC_VALIDATION_ERROR",
            BoaError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            BoaError::CampaignLocked { .. } => "CAMPAIGN_LOCKED",
            BoaError::DecisionAlreadyExists { .. } => "DECISION_ALREADY_EXISTS",
            BoaError::PluginNotFound { .. } => "PLUGIN_NOT_FOUND",
            BoaError::Execution { .. } => "EXECUTION_ERROR",
            BoaError::JobNotFound(_) => "JOB_NOT_FOUND",
            BoaError::JobAlreadyRunning(_) => "JOB_ALREADY_RUNNING",
            BoaError::Repository(_) => "REPOSITORY_ERROR",
            BoaError::Serialization(_) => "SERIALIZATION_ERROR",
            BoaError::Io(_) => "IO_ERROR",
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            BoaError::NotFound { .. } | BoaError::JobNotFound(_) => StatusCode::NOT_FOUND,

            BoaError::Validation(_)
            | BoaError::SpecLoad(_)
            | BoaError::SpecValidation { .. }
            | BoaError::InvalidStateTransition { .. }
            | BoaError::PluginNotFound { .. } => StatusCode::BAD_REQUEST,

            BoaError::CampaignLocked { .. }
            | BoaError::DecisionAlreadyExists { .. }
            | BoaError::JobAlreadyRunning(_) => StatusCode::CONFLICT,

            BoaError::Execution { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            BoaError::Repository(_) | BoaError::Serialization(_) | BoaError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Structured details for responses that need enough context to re-drive
    /// the operation (conflicting lock holder, offending transition, ...).
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            BoaError::CampaignLocked {
                campaign_id,
                locked_by,
                expires_at,
            } => Some(serde_json::json!({
                "campaign_id": campaign_id,
                "locked_by": locked_by,
                "expires_at": expires_at.to_rfc3339(),
            })),
            BoaError::InvalidStateTransition { from, to } => Some(serde_json::json!({
                "from": from,
                "to": to,
            })),
            BoaError::SpecValidation { errors } => Some(serde_json::json!({ "errors": errors })),
            BoaError::PluginNotFound { available, .. } => {
                Some(serde_json::json!({ "available": available }))
            }
            _ => None,
        }
    }

    /// Shortcut for entity-not-found errors
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        BoaError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl IntoResponse for BoaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiError {
            code: self.code().to_string(),
            message: self.to_string(),
            details: self.details(),
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = BoaError::not_found("campaign", "abc");
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = BoaError::DecisionAlreadyExists {
            iteration_id: "it1".to_string(),
        };
        assert_eq!(err.code(), "DECISION_ALREADY_EXISTS");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_locked_error_carries_holder() {
        let err = BoaError::CampaignLocked {
            campaign_id: "c1".to_string(),
            locked_by: "worker_1".to_string(),
            expires_at: Utc::now(),
        };
        let details = err.details().unwrap();
        assert_eq!(details["locked_by"], "worker_1");
    }
}
