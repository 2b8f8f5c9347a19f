//! HTTP-facing error type.
//!
//! Every failure leaves the handlers as `{ "success": false, "message": ... }`
//! with a matching status code. Storage details are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::chain::ChainError;
use crate::storage::StoreError;
use crate::workflow::WorkflowError;

#[derive(Debug, Serialize)]
pub struct FailureBody {
    pub success: bool,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or empty request (400).
    #[error("{0}")]
    BadRequest(String),

    /// Request clashes with ledger contents (409).
    #[error("{0}")]
    Conflict(String),

    /// Transient contention; the client may retry (503).
    #[error("{0}")]
    Unavailable(String),

    /// Storage or other server-side failure (500).
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };
        let body = FailureBody {
            success: false,
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<ChainError> for AppError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::AppendConflict { .. } => {
                Self::Unavailable("ledger is busy, please retry".to_string())
            }
            ChainError::Store(inner) => inner.into(),
        }
    }
}

impl From<WorkflowError> for AppError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::EmptyInput => Self::BadRequest("No file content supplied.".to_string()),
            WorkflowError::InputRead(detail) => {
                tracing::warn!(%detail, "upload could not be read");
                Self::BadRequest("Could not read the uploaded file.".to_string())
            }
            WorkflowError::Duplicate { index } => {
                Self::Conflict(format!("File is already registered in block {index}."))
            }
            WorkflowError::Chain(inner) => inner.into(),
        }
    }
}
