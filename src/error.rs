use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::NaiveDate;
use thiserror::Error;
use tracing::error;

use crate::models::{BlockId, InstanceId, SeriesId};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("series {0} not found")]
    SeriesNotFound(SeriesId),
    #[error("instance {0} not found")]
    InstanceNotFound(InstanceId),
    #[error("block {0} not found")]
    BlockNotFound(BlockId),
    #[error("series {series_id} has no occurrence on {date}")]
    OccurrenceNotFound { series_id: SeriesId, date: NaiveDate },
    #[error("{0}")]
    InvariantViolation(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ScheduleError {
    pub fn invariant(message: impl Into<String>) -> Self {
        ScheduleError::InvariantViolation(message.into())
    }
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(value: ScheduleError) -> Self {
        match value {
            ScheduleError::SeriesNotFound(_)
            | ScheduleError::InstanceNotFound(_)
            | ScheduleError::BlockNotFound(_)
            | ScheduleError::OccurrenceNotFound { .. } => ApiError::NotFound(value.to_string()),
            ScheduleError::InvariantViolation(msg) => ApiError::BadRequest(msg),
            ScheduleError::Storage(StoreError::NotFound { .. }) => {
                ApiError::NotFound(value.to_string())
            }
            ScheduleError::Storage(err) => {
                error!("Storage error: {err}");
                ApiError::Internal("Failed to apply schedule change".into())
            }
        }
    }
}
