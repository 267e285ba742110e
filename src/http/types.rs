use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::domain::error::{AuthError, StoreError, TaskError};

/// Wire shape for every failed request. Failed writes surface here, in
/// the response of the triggering request, never via a later snapshot.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: "bad-request", message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "code": self.code, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = match &err {
            AuthError::InvalidCredentials | AuthError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AuthError::AccountExists => StatusCode::CONFLICT,
            AuthError::WeakPassword => StatusCode::BAD_REQUEST,
            AuthError::Provider(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, code: err.code(), message: err.to_string() }
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        let (status, code) = match &err {
            TaskError::EmptyTitle => (StatusCode::BAD_REQUEST, "tasks/empty-title"),
            TaskError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "auth/not-signed-in"),
            TaskError::Store(StoreError::NotFound) => (StatusCode::NOT_FOUND, "tasks/not-found"),
            TaskError::Store(StoreError::Backend(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "tasks/write-failed")
            }
        };
        Self { status, code, message: err.to_string() }
    }
}
