use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind, Error as DieselError};
use log::error;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::security::validation::ValidationError;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("{0}")]
    Validation(String),

    #[error("validation failed")]
    InvalidFields(Vec<ValidationError>),

    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{service} is not configured")]
    NotConfigured { service: &'static str },

    #[error("{service} request failed: {message}")]
    Integration {
        service: &'static str,
        message: String,
    },

    #[error("database error: {0}")]
    Database(#[from] DieselError),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type CrmResult<T> = Result<T, CrmError>;

impl CrmError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn integration(service: &'static str, message: impl Into<String>) -> Self {
        Self::Integration {
            service,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::InvalidFields(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Integration { .. } => StatusCode::BAD_GATEWAY,
            Self::Database(DieselError::NotFound) => StatusCode::NOT_FOUND,
            Self::Database(DieselError::DatabaseError(kind, _)) => match kind {
                DatabaseErrorKind::UniqueViolation => StatusCode::CONFLICT,
                DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::CheckViolation
                | DatabaseErrorKind::NotNullViolation => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Database(_) | Self::Pool(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self.status() {
            StatusCode::NOT_FOUND => "not_found",
            StatusCode::BAD_REQUEST => "bad_request",
            StatusCode::UNPROCESSABLE_ENTITY => "validation_error",
            StatusCode::UNAUTHORIZED => "unauthorized",
            StatusCode::FORBIDDEN => "forbidden",
            StatusCode::CONFLICT => "conflict",
            StatusCode::SERVICE_UNAVAILABLE => "service_unavailable",
            StatusCode::BAD_GATEWAY => "integration_error",
            _ => "internal_error",
        }
    }

    /// Message safe to show to the caller. Storage and internal failures are
    /// replaced by a generic text; the detail goes to the log.
    fn public_message(&self) -> String {
        match self {
            Self::Database(DieselError::NotFound) => "Record not found".to_string(),
            Self::Database(DieselError::DatabaseError(kind, info)) => match kind {
                DatabaseErrorKind::UniqueViolation => "Record already exists".to_string(),
                DatabaseErrorKind::ForeignKeyViolation => {
                    format!("Referenced record does not exist: {}", info.message())
                }
                DatabaseErrorKind::CheckViolation | DatabaseErrorKind::NotNullViolation => {
                    format!("Invalid value: {}", info.message())
                }
                _ => "An internal error occurred".to_string(),
            },
            Self::Database(_) | Self::Pool(_) | Self::Internal(_) => {
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, String>>,
}

impl IntoResponse for CrmError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {self}");
        }

        let details = match &self {
            Self::InvalidFields(errors) => Some(
                errors
                    .iter()
                    .map(|e| (e.field().to_string(), e.to_string()))
                    .collect(),
            ),
            _ => None,
        };

        let body = ErrorBody {
            error: self.code(),
            message: self.public_message(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<tokio::task::JoinError> for CrmError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("blocking task failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(CrmError::not_found("lead").status(), StatusCode::NOT_FOUND);
        assert_eq!(CrmError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            CrmError::Database(DieselError::NotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            CrmError::integration("stripe", "boom").status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_internal_message_is_generic() {
        let err = CrmError::Internal("secret connection string".to_string());
        assert_eq!(err.public_message(), "An internal error occurred");
        assert_eq!(err.code(), "internal_error");
    }

    #[test]
    fn test_invalid_fields_carry_details() {
        let err = CrmError::InvalidFields(vec![ValidationError::Required("name".to_string())]);
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
