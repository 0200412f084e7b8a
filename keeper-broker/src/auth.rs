//! Per-call authorization in front of the `/v1` RPC surface.

pub mod gateway;
pub mod password;
pub mod token;

use axum::body::{Body, Bytes};
use axum::extract::{FromRequestParts, State};
use axum::http::Request;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use keeper_core::{AuthFailure, UserId};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::{
    DeleteMetadataRequest, DeleteSecretRequest, DestroySecretRequest, GetSecretRequest,
    ListSecretsRequest, ListVersionsRequest, SaveSecretRequest, UndeleteSecretRequest,
};
use crate::state::AppState;
use crate::telemetry::CorrelationId;

pub use gateway::AuthGateway;
pub use password::PasswordService;
pub use token::{IssuedToken, TokenService};

/// Every RPC the server exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Register,
    Login,
    GetSecret,
    ListSecrets,
    SaveSecret,
    DeleteSecret,
    DestroySecret,
    DeleteMetadata,
    UndeleteSecret,
    ListVersions,
}

/// Operations reachable without a token.
pub const UNAUTHENTICATED_OPERATIONS: &[Operation] = &[Operation::Register, Operation::Login];

impl Operation {
    pub const ALL: [Operation; 10] = [
        Operation::Register,
        Operation::Login,
        Operation::GetSecret,
        Operation::ListSecrets,
        Operation::SaveSecret,
        Operation::DeleteSecret,
        Operation::DestroySecret,
        Operation::DeleteMetadata,
        Operation::UndeleteSecret,
        Operation::ListVersions,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Register => "auth.register",
            Operation::Login => "auth.login",
            Operation::GetSecret => "vault.get_secret",
            Operation::ListSecrets => "vault.list_secrets",
            Operation::SaveSecret => "vault.save_secret",
            Operation::DeleteSecret => "vault.delete_secret",
            Operation::DestroySecret => "vault.destroy_secret",
            Operation::DeleteMetadata => "vault.delete_metadata",
            Operation::UndeleteSecret => "vault.undelete_secret",
            Operation::ListVersions => "vault.list_versions",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Operation::Register => "/v1/auth/register",
            Operation::Login => "/v1/auth/login",
            Operation::GetSecret => "/v1/vault/get_secret",
            Operation::ListSecrets => "/v1/vault/list_secrets",
            Operation::SaveSecret => "/v1/vault/save_secret",
            Operation::DeleteSecret => "/v1/vault/delete_secret",
            Operation::DestroySecret => "/v1/vault/destroy_secret",
            Operation::DeleteMetadata => "/v1/vault/delete_metadata",
            Operation::UndeleteSecret => "/v1/vault/undelete_secret",
            Operation::ListVersions => "/v1/vault/list_versions",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.trim_end_matches('/');
        Self::ALL.into_iter().find(|op| op.path() == path)
    }

    pub fn requires_token(self) -> bool {
        !UNAUTHENTICATED_OPERATIONS.contains(&self)
    }
}

/// Request bodies that carry the caller's session token.
pub trait TokenBearer {
    fn token(&self) -> Option<&str>;
}

/// Identity of an authorized call, inserted by [`rpc_layer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub user_id: UserId,
    pub operation: Operation,
}

impl<S> FromRequestParts<S> for CallContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<CallContext>().cloned().ok_or_else(|| {
            let err = AppError::from(AuthFailure::MissingToken);
            match parts.extensions.get::<CorrelationId>() {
                Some(correlation) => err.with_correlation(correlation.0.clone()),
                None => err,
            }
        })
    }
}

/// Just the token of a body whose other fields do not decode; the handler
/// reports those as a bad request once the caller is authorized.
#[derive(Deserialize)]
struct TokenEnvelope {
    #[serde(default)]
    token: Option<String>,
}

impl TokenBearer for TokenEnvelope {
    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

fn bearer_token<T>(body: &Bytes) -> Result<String, AuthFailure>
where
    T: DeserializeOwned + TokenBearer,
{
    let token = match serde_json::from_slice::<T>(body) {
        Ok(request) => request.token().map(str::to_owned),
        Err(_) => serde_json::from_slice::<TokenEnvelope>(body)
            .map_err(|_| AuthFailure::MissingToken)?
            .token,
    };
    token
        .map(|token| token.trim().to_owned())
        .filter(|token| !token.is_empty())
        .ok_or(AuthFailure::MissingToken)
}

fn token_for(operation: Operation, body: &Bytes) -> Result<String, AuthFailure> {
    match operation {
        Operation::GetSecret => bearer_token::<GetSecretRequest>(body),
        Operation::ListSecrets => bearer_token::<ListSecretsRequest>(body),
        Operation::SaveSecret => bearer_token::<SaveSecretRequest>(body),
        Operation::DeleteSecret => bearer_token::<DeleteSecretRequest>(body),
        Operation::DestroySecret => bearer_token::<DestroySecretRequest>(body),
        Operation::DeleteMetadata => bearer_token::<DeleteMetadataRequest>(body),
        Operation::UndeleteSecret => bearer_token::<UndeleteSecretRequest>(body),
        Operation::ListVersions => bearer_token::<ListVersionsRequest>(body),
        Operation::Register | Operation::Login => Err(AuthFailure::MissingToken),
    }
}

/// Validates the token carried in the request body and records the caller.
///
/// Unknown operations and bodies without a token are rejected before any
/// handler runs.
pub async fn rpc_layer(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let correlation = req.extensions().get::<CorrelationId>().cloned();
    let reject = |err: AppError, operation: Option<Operation>| {
        let err = match operation {
            Some(operation) => err.with_operation(operation),
            None => err,
        };
        match &correlation {
            Some(correlation) => err.with_correlation(correlation.0.clone()),
            None => err,
        }
        .into_response()
    };

    let Some(operation) = Operation::from_path(req.uri().path()) else {
        debug!(path = req.uri().path(), "rejecting unknown operation");
        return reject(AppError::unauthorized("unknown operation"), None);
    };
    if !operation.requires_token() {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, state.limits.max_request_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return reject(
                AppError::bad_request("request body is unreadable or too large"),
                Some(operation),
            );
        }
    };

    let user_id = match token_for(operation, &bytes)
        .map_err(keeper_core::Error::from)
        .and_then(|token| state.tokens.validate(&token))
    {
        Ok(user_id) => user_id,
        Err(err) => {
            warn!(operation = operation.name(), error = %err, "call rejected");
            return reject(AppError::from(err), Some(operation));
        }
    };

    parts.extensions.insert(CallContext { user_id, operation });
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_round_trip_through_paths() {
        for operation in Operation::ALL {
            assert_eq!(Operation::from_path(operation.path()), Some(operation));
        }
        assert_eq!(Operation::from_path("/v1/vault/unknown"), None);
        assert_eq!(
            Operation::from_path("/v1/auth/login/"),
            Some(Operation::Login)
        );
    }

    #[test]
    fn only_auth_operations_are_exempt() {
        let exempt: Vec<_> = Operation::ALL
            .into_iter()
            .filter(|op| !op.requires_token())
            .collect();
        assert_eq!(exempt, vec![Operation::Register, Operation::Login]);
    }

    #[test]
    fn token_extraction_fails_closed() {
        let body = Bytes::from_static(br#"{"path":"a"}"#);
        assert_eq!(
            token_for(Operation::GetSecret, &body),
            Err(AuthFailure::MissingToken)
        );

        let blank = Bytes::from_static(br#"{"token":"  ","path":"a"}"#);
        assert!(token_for(Operation::DeleteSecret, &blank).is_err());

        let garbage = Bytes::from_static(b"not json");
        assert!(token_for(Operation::ListSecrets, &garbage).is_err());

        let ok = Bytes::from_static(br#"{"token":"abc","path":"a","version":2}"#);
        assert_eq!(
            token_for(Operation::UndeleteSecret, &ok).as_deref(),
            Ok("abc")
        );

        let non_string = Bytes::from_static(br#"{"token":42,"path":"a"}"#);
        assert!(token_for(Operation::GetSecret, &non_string).is_err());
    }

    #[test]
    fn token_survives_malformed_fields() {
        let bad_version = Bytes::from_static(br#"{"token":"abc","path":"a","version":"two"}"#);
        assert_eq!(
            token_for(Operation::UndeleteSecret, &bad_version).as_deref(),
            Ok("abc")
        );

        let missing_value = Bytes::from_static(br#"{"token":"abc","path":"a"}"#);
        assert_eq!(
            token_for(Operation::SaveSecret, &missing_value).as_deref(),
            Ok("abc")
        );
    }
}
