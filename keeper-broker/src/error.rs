use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use keeper_core::AuthFailure;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::auth::Operation;
use crate::telemetry::{CORRELATION_ID_HEADER, CorrelationId, correlation_header_value};

#[derive(Debug, Error)]
pub enum AppErrorKind {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("unexpected error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
#[error("{kind}")]
pub struct AppError {
    kind: AppErrorKind,
    operation: Option<&'static str>,
    correlation_id: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            operation: None,
            correlation_id: None,
        }
    }

    pub fn kind(&self) -> &AppErrorKind {
        &self.kind
    }

    pub fn with_correlation(mut self, id: String) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation.name());
        self
    }

    /// Attaches the operation and correlation id of the failing call.
    pub fn for_call(self, operation: Operation, correlation: &CorrelationId) -> Self {
        self.with_operation(operation)
            .with_correlation(correlation.0.clone())
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            AppErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            AppErrorKind::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppErrorKind::Conflict(_) => StatusCode::CONFLICT,
            AppErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            AppErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request<T: Into<String>>(message: T) -> Self {
        Self::new(AppErrorKind::BadRequest(message.into()))
    }

    pub fn unauthorized<T: Into<String>>(message: T) -> Self {
        Self::new(AppErrorKind::Unauthorized(message.into()))
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(AppErrorKind::DeadlineExceeded)
    }

    fn code(&self) -> &'static str {
        match &self.kind {
            AppErrorKind::BadRequest(_) => "bad_request",
            AppErrorKind::NotFound(_) => "not_found",
            AppErrorKind::Unauthorized(_) => "unauthorized",
            AppErrorKind::Conflict(_) => "conflict",
            AppErrorKind::DeadlineExceeded => "deadline_exceeded",
            AppErrorKind::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    operation: Option<&'a str>,
    correlation_id: Option<&'a str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.kind {
            AppErrorKind::Internal(detail) => {
                error!(
                    operation = self.operation.unwrap_or("-"),
                    correlation_id = self.correlation_id.as_deref().unwrap_or("-"),
                    detail = %detail,
                    "request failed"
                );
                "internal error".to_string()
            }
            kind => kind.to_string(),
        };
        let body = Json(ErrorBody {
            error: self.code(),
            message,
            operation: self.operation,
            correlation_id: self.correlation_id.as_deref(),
        });

        let mut response = (status, body).into_response();
        if let Some(id) = &self.correlation_id {
            response
                .headers_mut()
                .insert(CORRELATION_ID_HEADER, correlation_header_value(id));
        }
        response
    }
}

impl From<keeper_core::Error> for AppError {
    fn from(value: keeper_core::Error) -> Self {
        let kind = match value {
            keeper_core::Error::Validation { .. } => AppErrorKind::BadRequest(value.to_string()),
            keeper_core::Error::Unauthenticated(reason) => {
                AppErrorKind::Unauthorized(reason.to_string())
            }
            keeper_core::Error::NotFound { entity } => AppErrorKind::NotFound(entity),
            keeper_core::Error::Crypto(_) => AppErrorKind::Conflict("integrity check failed".into()),
            keeper_core::Error::Storage(err) | keeper_core::Error::Config(err) => {
                AppErrorKind::Internal(err)
            }
        };
        AppError::new(kind)
    }
}

impl From<AuthFailure> for AppError {
    fn from(value: AuthFailure) -> Self {
        AppError::unauthorized(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_statuses() {
        let cases = [
            (
                keeper_core::Error::validation("path", "empty"),
                StatusCode::BAD_REQUEST,
            ),
            (
                keeper_core::Error::Unauthenticated(AuthFailure::ExpiredToken),
                StatusCode::UNAUTHORIZED,
            ),
            (
                keeper_core::Error::not_found("secret a"),
                StatusCode::NOT_FOUND,
            ),
            (
                keeper_core::Error::Crypto("tag".into()),
                StatusCode::CONFLICT,
            ),
            (
                keeper_core::Error::Storage("db down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                keeper_core::Error::Config("bad".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
        assert_eq!(
            AppError::deadline_exceeded().status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[tokio::test]
    async fn internal_details_stay_off_the_wire() {
        let response = AppError::from(keeper_core::Error::Storage("password=hunter2".into()))
            .for_call(Operation::SaveSecret, &CorrelationId("corr-1".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(CORRELATION_ID_HEADER).unwrap(),
            "corr-1"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "internal");
        assert_eq!(body["message"], "internal error");
        assert_eq!(body["operation"], "vault.save_secret");
        assert_eq!(body["correlation_id"], "corr-1");
    }
}
