use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Stage, StageStatus};
use crate::state::LifecycleState;

/// Control-plane error taxonomy.
///
/// Precondition failures (`InvalidTransition`, `AppNotLive`, `NotFound`,
/// `BackupIncomplete`, `ConflictingStageOutcome`) are returned synchronously
/// and never written to durable history. `ExternalFailure` is always recorded
/// durably (history row or backup error annotation) before it propagates.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: LifecycleState, to: LifecycleState },

    #[error("app is not live (current state: {actual})")]
    AppNotLive { actual: LifecycleState },

    #[error("conflicting outcome for stage {stage}: {recorded:?} already recorded, {requested:?} requested")]
    ConflictingStageOutcome {
        stage: Stage,
        recorded: StageStatus,
        requested: StageStatus,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("backup {0} has not completed")]
    BackupIncomplete(Uuid),

    #[error("external backend failure: {0}")]
    ExternalFailure(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound { kind, id: id.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", msg)
    }
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", msg)
    }
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", msg)
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody { code: self.code, message: self.message };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::InvalidTransition { .. } => {
                Self::new(StatusCode::CONFLICT, "invalid_transition", message)
            }
            Error::AppNotLive { .. } => Self::new(StatusCode::CONFLICT, "app_not_live", message),
            Error::ConflictingStageOutcome { .. } => {
                Self::new(StatusCode::CONFLICT, "conflicting_stage_outcome", message)
            }
            Error::NotFound { .. } => Self::not_found(message),
            Error::AlreadyExists { .. } => Self::conflict(message),
            Error::BackupIncomplete(_) => {
                Self::new(StatusCode::CONFLICT, "backup_incomplete", message)
            }
            Error::ExternalFailure(_) => {
                Self::new(StatusCode::BAD_GATEWAY, "external_failure", message)
            }
            Error::Store(_) => Self::internal(message),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
