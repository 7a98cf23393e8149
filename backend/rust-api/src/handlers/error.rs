use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::errors::QuizError;
use crate::store::StoreError;

/// Error returned by every API handler: `{ "error": code, "message": text }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        StoreError::Network(_)
        | StoreError::Unauthorized(_)
        | StoreError::Rejected { .. }
        | StoreError::Decode(_)
        | StoreError::Unsupported(_) => StatusCode::BAD_GATEWAY,
    }
}

impl From<QuizError> for ApiError {
    fn from(err: QuizError) -> Self {
        let status = match &err {
            QuizError::NoQuestions => StatusCode::UNPROCESSABLE_ENTITY,
            QuizError::SessionNotFound(_) | QuizError::NotFound(_) => StatusCode::NOT_FOUND,
            QuizError::AlreadyAnswered(_)
            | QuizError::SessionCompleted
            | QuizError::ToggleInProgress => StatusCode::CONFLICT,
            QuizError::NotCurrentQuestion { .. }
            | QuizError::IndexOutOfRange { .. }
            | QuizError::InvalidChoice(_)
            | QuizError::Validation(_) => StatusCode::BAD_REQUEST,
            QuizError::TimeExpired => StatusCode::GONE,
            QuizError::Forbidden(_) => StatusCode::FORBIDDEN,
            QuizError::Store(store) => store_status(store),
            QuizError::Cache(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        // Backend failures are logged in full and reported generically
        let message = match &err {
            QuizError::Store(_) | QuizError::Cache(_) => {
                tracing::error!(code = err.code(), "Request failed: {}", err);
                "A backend service is unavailable, please retry".to_string()
            }
            _ => err.to_string(),
        };

        Self::new(status, err.code(), message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.code,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiz_errors_map_to_status_codes() {
        let err = ApiError::from(QuizError::AlreadyAnswered("q1".into()));
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "already_answered");

        let err = ApiError::from(QuizError::TimeExpired);
        assert_eq!(err.status, StatusCode::GONE);

        let err = ApiError::from(QuizError::Store(StoreError::Timeout));
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
        assert!(!err.message.contains("timed out"));
    }
}
