//! Error types for the HIS REST API.
//!
//! Every error renders as `{"error": {"code": ..., "message": ...}}`.
//!
//! # Error Mapping
//!
//! | Storage Error | HTTP Status | Code |
//! |--------------|-------------|------|
//! | TenantError::Required | 400 | tenant_required |
//! | TenantError::InvalidSchemaName | 400 | invalid_schema_name |
//! | ValidationError | 400 | invalid_input |
//! | TenantError::Inactive | 403 | tenant_inactive |
//! | TenantError::SchemaMismatch | 403 | schema_mismatch |
//! | TenantError::NotFound | 404 | tenant_not_found |
//! | RecordError::NotFound | 404 | not_found |
//! | Duplicate* | 409 | duplicate |
//! | ConcurrencyError | 503 | retry |
//! | everything else | 500 | internal |
//!
//! Internal errors are logged and answered with a generic message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use his_persistence::error::{RecordError, StorageError, TenantError};
use std::fmt;
use tracing::error;

use crate::auth::AuthError;

/// The primary error type for REST API operations.
#[derive(Debug)]
pub enum RestError {
    /// Malformed request or missing tenant (HTTP 400).
    BadRequest {
        /// Machine-readable code.
        code: &'static str,
        /// Error message.
        message: String,
    },

    /// Missing or invalid bearer token (HTTP 401).
    Unauthorized {
        /// Error message.
        message: String,
    },

    /// Disabled tenant, foreign credential or missing admin flag (HTTP 403).
    Forbidden {
        /// Machine-readable code.
        code: &'static str,
        /// Error message.
        message: String,
    },

    /// Unknown tenant or record (HTTP 404).
    NotFound {
        /// Machine-readable code.
        code: &'static str,
        /// Error message.
        message: String,
    },

    /// Unique value already taken (HTTP 409).
    Conflict {
        /// Error message.
        message: String,
    },

    /// Lock timeout or deadlock; the caller may retry (HTTP 503).
    ServiceUnavailable {
        /// Error message.
        message: String,
    },

    /// Internal server error (HTTP 500). The message is logged, never returned.
    InternalError {
        /// Error message.
        message: String,
    },
}

impl RestError {
    /// A 400 with code `invalid_input`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        RestError::BadRequest {
            code: "invalid_input",
            message: message.into(),
        }
    }

    /// A 401.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        RestError::Unauthorized {
            message: message.into(),
        }
    }

    /// A 500.
    pub fn internal(message: impl Into<String>) -> Self {
        RestError::InternalError {
            message: message.into(),
        }
    }

    /// The HTTP status this error renders with.
    pub fn status(&self) -> StatusCode {
        match self {
            RestError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            RestError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            RestError::Forbidden { .. } => StatusCode::FORBIDDEN,
            RestError::NotFound { .. } => StatusCode::NOT_FOUND,
            RestError::Conflict { .. } => StatusCode::CONFLICT,
            RestError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RestError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The machine-readable code in the response body.
    pub fn code(&self) -> &'static str {
        match self {
            RestError::BadRequest { code, .. }
            | RestError::Forbidden { code, .. }
            | RestError::NotFound { code, .. } => code,
            RestError::Unauthorized { .. } => "unauthorized",
            RestError::Conflict { .. } => "duplicate",
            RestError::ServiceUnavailable { .. } => "retry",
            RestError::InternalError { .. } => "internal",
        }
    }
}

impl fmt::Display for RestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestError::BadRequest { message, .. } => write!(f, "Bad request: {}", message),
            RestError::Unauthorized { message } => write!(f, "Unauthorized: {}", message),
            RestError::Forbidden { message, .. } => write!(f, "Forbidden: {}", message),
            RestError::NotFound { message, .. } => write!(f, "Not found: {}", message),
            RestError::Conflict { message } => write!(f, "Conflict: {}", message),
            RestError::ServiceUnavailable { message } => {
                write!(f, "Service unavailable: {}", message)
            }
            RestError::InternalError { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for RestError {}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match self {
            RestError::InternalError { message } => {
                error!(error = %message, "Internal error");
                "internal server error".to_string()
            }
            RestError::ServiceUnavailable { message } => {
                error!(error = %message, "Transient storage failure");
                "temporarily unavailable, retry the request".to_string()
            }
            RestError::BadRequest { message, .. }
            | RestError::Unauthorized { message }
            | RestError::Forbidden { message, .. }
            | RestError::NotFound { message, .. }
            | RestError::Conflict { message } => message,
        };

        (status, Json(error_body(code, &message))).into_response()
    }
}

/// Builds the JSON error envelope.
pub fn error_body(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "code": code,
            "message": message
        }
    })
}

impl From<StorageError> for RestError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Tenant(e) => e.into(),
            StorageError::Record(e) => e.into(),
            StorageError::Validation(e) => RestError::bad_request(e.to_string()),
            StorageError::Concurrency(e) => RestError::ServiceUnavailable {
                message: e.to_string(),
            },
            StorageError::Provisioning(e) => RestError::internal(e.to_string()),
            StorageError::Backend(e) => RestError::internal(e.to_string()),
        }
    }
}

impl From<TenantError> for RestError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::Required => RestError::BadRequest {
                code: "tenant_required",
                message: "tenant context required; use the tenant subdomain".to_string(),
            },
            TenantError::InvalidSchemaName { .. } => RestError::BadRequest {
                code: "invalid_schema_name",
                message: err.to_string(),
            },
            TenantError::NotFound { .. } => RestError::NotFound {
                code: "tenant_not_found",
                message: err.to_string(),
            },
            TenantError::Inactive { .. } => RestError::Forbidden {
                code: "tenant_inactive",
                message: err.to_string(),
            },
            TenantError::SchemaMismatch { .. } => RestError::Forbidden {
                code: "schema_mismatch",
                message: "credential does not belong to this tenant".to_string(),
            },
            TenantError::DuplicateSchema { .. } | TenantError::DuplicateSubdomain { .. } => {
                RestError::Conflict {
                    message: err.to_string(),
                }
            }
        }
    }
}

impl From<RecordError> for RestError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::NotFound { .. } => RestError::NotFound {
                code: "not_found",
                message: err.to_string(),
            },
            RecordError::Duplicate { .. } => RestError::Conflict {
                message: err.to_string(),
            },
        }
    }
}

impl From<AuthError> for RestError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Encode(_) => RestError::internal(err.to_string()),
            _ => RestError::unauthorized(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RestError {
    fn from(err: serde_json::Error) -> Self {
        RestError::bad_request(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias for REST operations.
pub type RestResult<T> = Result<T, RestError>;

#[cfg(test)]
mod tests {
    use super::*;
    use his_persistence::error::{BackendError, ConcurrencyError, ValidationError};

    #[test]
    fn test_tenant_errors_map_to_distinct_statuses() {
        let not_found: RestError = TenantError::NotFound {
            key: "bangkok".to_string(),
        }
        .into();
        let inactive: RestError = TenantError::Inactive {
            key: "bangkok".to_string(),
        }
        .into();
        let required: RestError = TenantError::Required.into();

        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.code(), "tenant_not_found");
        assert_eq!(inactive.status(), StatusCode::FORBIDDEN);
        assert_eq!(inactive.code(), "tenant_inactive");
        assert_eq!(required.status(), StatusCode::BAD_REQUEST);
        assert_eq!(required.code(), "tenant_required");
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err: RestError = StorageError::from(ValidationError::invalid(
            "hospital_code",
            "must be exactly 8 characters",
        ))
        .into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn test_concurrency_maps_to_service_unavailable() {
        let err: RestError = StorageError::from(ConcurrencyError::LockTimeout {
            message: "canceling statement due to lock timeout".to_string(),
        })
        .into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_duplicates_map_to_conflict() {
        let err: RestError = StorageError::from(RecordError::Duplicate {
            kind: "patient",
            message: "national_id".to_string(),
        })
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_internal_error_message_not_echoed() {
        let err: RestError = StorageError::from(BackendError::MigrationError {
            message: "relation \"tenants\" does not exist".to_string(),
        })
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "internal");
        assert_eq!(body["error"]["message"], "internal server error");
        assert!(!bytes.windows(7).any(|w| w == b"tenants"));
    }

    #[test]
    fn test_error_body_shape() {
        let body = error_body("tenant_not_found", "tenant not found: x");
        assert_eq!(body["error"]["code"], "tenant_not_found");
        assert_eq!(body["error"]["message"], "tenant not found: x");
    }
}
