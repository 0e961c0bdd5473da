use std::path::PathBuf;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hyperindex_core::AggregationError;
use hyperindex_store::{FailureKind, PersistenceError};
use serde::Serialize;

/// A failed fetch for one wallet. The wallet is left out of the run.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Exchange returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Transport failures, timeouts, rate limiting and server errors may
    /// succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(_) | FetchError::Timeout(_) => true,
            FetchError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            FetchError::Malformed(_) => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CohortError {
    #[error("Failed to read cohort file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cohort file {} lists no valid wallet addresses", .path.display())]
    Empty { path: PathBuf },
}

/// Why a cycle produced no snapshot.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Cohort(#[from] CohortError),

    #[error("All {0} wallet fetches failed")]
    AllWalletsFailed(usize),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl RunError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RunError::Cohort(_) => FailureKind::Cohort,
            RunError::AllWalletsFailed(_) => FailureKind::AllWalletsFailed,
            RunError::Aggregation(_) => FailureKind::Aggregation,
            RunError::Persistence(_) => FailureKind::Persistence,
        }
    }

    /// Another writer holds the data directory.
    pub fn is_locked(&self) -> bool {
        matches!(self, RunError::Persistence(PersistenceError::Locked { .. }))
    }
}

/// Errors returned by the read-only HTTP endpoints.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No run has completed yet")]
    NeverRun,

    #[error("Storage error: {0}")]
    Storage(#[from] PersistenceError),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::NotFound(what) => {
                tracing::info!(what = %what, error_code = "NOT_FOUND", "Record not found");
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            AppError::NeverRun => {
                tracing::info!(error_code = "NEVER_RUN", "Health requested before first run");
                (StatusCode::SERVICE_UNAVAILABLE, "NEVER_RUN")
            }
            AppError::Storage(e) => {
                tracing::error!(error = %e, error_code = "STORAGE_ERROR", "Failed to read stored record");
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
            }
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
