use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::{Extension, Json, Router, routing::get, routing::post};
use keeper_core::SaveSecret;
use tracing::Instrument;

use crate::auth::{self, CallContext, Operation};
use crate::deadline;
use crate::error::AppError;
use crate::models::{
    AckResponse, AuthRequest, AuthResponse, DeleteMetadataRequest, DeleteSecretRequest,
    DestroySecretRequest, GetSecretRequest, ListSecretsRequest, ListSecretsResponse,
    ListVersionsRequest, SaveSecretRequest, SaveSecretResponse, SecretResponse,
    UndeleteSecretRequest, VersionsResponse,
};
use crate::state::AppState;
use crate::telemetry::{CorrelationId, correlation_layer, request_span};

pub fn router(state: AppState) -> Router {
    let api = api_routes()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::rpc_layer,
        ))
        .layer(DefaultBodyLimit::max(state.limits.max_request_bytes));

    Router::new()
        .route("/healthz", get(health_check))
        .merge(api)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            deadline::deadline_layer,
        ))
        .layer(middleware::from_fn(correlation_layer))
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route(Operation::Register.path(), post(register))
        .route(Operation::Login.path(), post(login))
        .route(Operation::GetSecret.path(), post(get_secret))
        .route(Operation::ListSecrets.path(), post(list_secrets))
        .route(Operation::SaveSecret.path(), post(save_secret))
        .route(Operation::DeleteSecret.path(), post(delete_secret))
        .route(Operation::DestroySecret.path(), post(destroy_secret))
        .route(Operation::DeleteMetadata.path(), post(delete_metadata))
        .route(Operation::UndeleteSecret.path(), post(undelete_secret))
        .route(Operation::ListVersions.path(), post(list_versions))
        // unknown operations still pass through the authorization layer
        .route("/v1/{*rest}", post(unknown_operation).get(unknown_operation))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn unknown_operation(Extension(correlation): Extension<CorrelationId>) -> AppError {
    AppError::unauthorized("unknown operation").with_correlation(correlation.0)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

async fn register(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    payload: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let span = request_span(Operation::Register.name(), &correlation.0);
    async move {
        let request = body(payload)?;
        let token = state
            .auth
            .register(&request.login, &request.password)
            .await?;
        Ok((
            StatusCode::CREATED,
            Json(AuthResponse::issued("user registered", token)),
        ))
    }
    .instrument(span)
    .await
    .map_err(|err: AppError| err.for_call(Operation::Register, &correlation))
}

async fn login(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    payload: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let span = request_span(Operation::Login.name(), &correlation.0);
    async move {
        let request = body(payload)?;
        let token = state.auth.login(&request.login, &request.password).await?;
        Ok(Json(AuthResponse::issued("login successful", token)))
    }
    .instrument(span)
    .await
    .map_err(|err: AppError| err.for_call(Operation::Login, &correlation))
}

async fn get_secret(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    call: CallContext,
    payload: Result<Json<GetSecretRequest>, JsonRejection>,
) -> Result<Json<SecretResponse>, AppError> {
    let span = request_span(call.operation.name(), &correlation.0);
    async move {
        let request = body(payload)?;
        let secret = state.vault.get(call.user_id, &request.path).await?;
        Ok(Json(SecretResponse::from(secret)))
    }
    .instrument(span)
    .await
    .map_err(|err: AppError| err.for_call(Operation::GetSecret, &correlation))
}

async fn list_secrets(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    call: CallContext,
    payload: Result<Json<ListSecretsRequest>, JsonRejection>,
) -> Result<Json<ListSecretsResponse>, AppError> {
    let span = request_span(call.operation.name(), &correlation.0);
    async move {
        body(payload)?;
        let paths = state.vault.list(call.user_id).await?;
        Ok(Json(ListSecretsResponse { paths }))
    }
    .instrument(span)
    .await
    .map_err(|err: AppError| err.for_call(Operation::ListSecrets, &correlation))
}

async fn save_secret(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    call: CallContext,
    payload: Result<Json<SaveSecretRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let span = request_span(call.operation.name(), &correlation.0);
    async move {
        let request = body(payload)?;
        let value = request.encoding.decode(&request.value)?;
        let saved = state
            .vault
            .save(
                call.user_id,
                SaveSecret {
                    path: request.path,
                    description: request.description,
                    payload: value,
                    expired_at: request.expired_at,
                    external_name: request.file_path,
                },
            )
            .await?;
        Ok((
            StatusCode::CREATED,
            Json(SaveSecretResponse {
                success: true,
                message: "secret saved".into(),
                path: saved.path,
                version: saved.version,
            }),
        ))
    }
    .instrument(span)
    .await
    .map_err(|err: AppError| err.for_call(Operation::SaveSecret, &correlation))
}

async fn delete_secret(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    call: CallContext,
    payload: Result<Json<DeleteSecretRequest>, JsonRejection>,
) -> Result<Json<AckResponse>, AppError> {
    let span = request_span(call.operation.name(), &correlation.0);
    async move {
        let request = body(payload)?;
        state.vault.delete(call.user_id, &request.path).await?;
        Ok(Json(AckResponse::ok("secret deleted")))
    }
    .instrument(span)
    .await
    .map_err(|err: AppError| err.for_call(Operation::DeleteSecret, &correlation))
}

async fn destroy_secret(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    call: CallContext,
    payload: Result<Json<DestroySecretRequest>, JsonRejection>,
) -> Result<Json<AckResponse>, AppError> {
    let span = request_span(call.operation.name(), &correlation.0);
    async move {
        let request = body(payload)?;
        state.vault.destroy(call.user_id, &request.path).await?;
        Ok(Json(AckResponse::ok("secret destroyed")))
    }
    .instrument(span)
    .await
    .map_err(|err: AppError| err.for_call(Operation::DestroySecret, &correlation))
}

async fn delete_metadata(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    call: CallContext,
    payload: Result<Json<DeleteMetadataRequest>, JsonRejection>,
) -> Result<Json<AckResponse>, AppError> {
    let span = request_span(call.operation.name(), &correlation.0);
    async move {
        let request = body(payload)?;
        state
            .vault
            .delete_metadata(call.user_id, &request.path)
            .await?;
        Ok(Json(AckResponse::ok("metadata deleted")))
    }
    .instrument(span)
    .await
    .map_err(|err: AppError| err.for_call(Operation::DeleteMetadata, &correlation))
}

async fn undelete_secret(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    call: CallContext,
    payload: Result<Json<UndeleteSecretRequest>, JsonRejection>,
) -> Result<Json<AckResponse>, AppError> {
    let span = request_span(call.operation.name(), &correlation.0);
    async move {
        let request = body(payload)?;
        state
            .vault
            .undelete(call.user_id, &request.path, request.version)
            .await?;
        Ok(Json(AckResponse::ok(format!(
            "version {} restored",
            request.version
        ))))
    }
    .instrument(span)
    .await
    .map_err(|err: AppError| err.for_call(Operation::UndeleteSecret, &correlation))
}

async fn list_versions(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    call: CallContext,
    payload: Result<Json<ListVersionsRequest>, JsonRejection>,
) -> Result<Json<VersionsResponse>, AppError> {
    let span = request_span(call.operation.name(), &correlation.0);
    async move {
        let request = body(payload)?;
        let versions = state.vault.versions(call.user_id, &request.path).await?;
        Ok(Json(VersionsResponse {
            path: request.path,
            versions,
        }))
    }
    .instrument(span)
    .await
    .map_err(|err: AppError| err.for_call(Operation::ListVersions, &correlation))
}
