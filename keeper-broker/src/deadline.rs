//! Per-call deadline taken from `x-keeper-timeout-ms`.

use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::auth::Operation;
use crate::error::AppError;
use crate::state::AppState;
use crate::telemetry::CorrelationId;

pub const TIMEOUT_HEADER: &str = "x-keeper-timeout-ms";

/// Requested timeout capped by `max`; a missing or unparsable header yields `max`.
pub fn effective_timeout(headers: &HeaderMap, max: Duration) -> Duration {
    headers
        .get(TIMEOUT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .map_or(max, |requested| requested.min(max))
}

/// Drops the in-flight call once its deadline elapses and answers 504.
pub async fn deadline_layer(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let timeout = effective_timeout(req.headers(), state.limits.request_timeout);
    let operation = Operation::from_path(req.uri().path());
    let correlation = req.extensions().get::<CorrelationId>().cloned();

    match tokio::time::timeout(timeout, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(
                operation = operation.map_or("-", Operation::name),
                timeout_ms = timeout.as_millis() as u64,
                "deadline exceeded"
            );
            let mut err = AppError::deadline_exceeded();
            if let Some(operation) = operation {
                err = err.with_operation(operation);
            }
            if let Some(correlation) = correlation {
                err = err.with_correlation(correlation.0);
            }
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn header_is_capped_by_the_configured_maximum() {
        let max = Duration::from_millis(1_000);
        let mut headers = HeaderMap::new();
        assert_eq!(effective_timeout(&headers, max), max);

        headers.insert(TIMEOUT_HEADER, HeaderValue::from_static("250"));
        assert_eq!(
            effective_timeout(&headers, max),
            Duration::from_millis(250)
        );

        headers.insert(TIMEOUT_HEADER, HeaderValue::from_static("60000"));
        assert_eq!(effective_timeout(&headers, max), max);

        headers.insert(TIMEOUT_HEADER, HeaderValue::from_static("soon"));
        assert_eq!(effective_timeout(&headers, max), max);
    }
}
