use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Url;
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

use crate::wire;
use crate::{
    AuthResponse, Result, SaveSecretResponse, SdkError, Secret, ValueEncoding, VersionEntry,
};

/// HTTP client for the keeper vault RPC API.
///
/// The session token returned by [`HttpClient::register`] or
/// [`HttpClient::login`] is kept and sent with every vault call.
#[derive(Clone)]
pub struct HttpClient {
    base_url: Url,
    client: reqwest::Client,
    token: Option<String>,
    timeout: Duration,
}

impl HttpClient {
    /// Build a new client using the provided base URL.
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        let url = Url::parse(base_url.as_ref())
            .map_err(|err| SdkError::InvalidResponse(err.to_string()))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("keeper-sdk/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: url,
            client,
            token: None,
            timeout: Duration::from_secs(10),
        })
    }

    /// Reuse a token obtained earlier.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Override the request timeout (default 10 seconds).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub async fn register(&mut self, login: &str, password: &str) -> Result<AuthResponse> {
        let response: AuthResponse = self
            .post("/v1/auth/register", &wire::AuthRequest { login, password })
            .await?;
        self.token = Some(response.token.clone());
        Ok(response)
    }

    pub async fn login(&mut self, login: &str, password: &str) -> Result<AuthResponse> {
        let response: AuthResponse = self
            .post("/v1/auth/login", &wire::AuthRequest { login, password })
            .await?;
        self.token = Some(response.token.clone());
        Ok(response)
    }

    pub async fn get_secret(&self, path: &str) -> Result<Secret> {
        let token = self.require_token()?;
        let payload: wire::SecretResponse = self
            .post("/v1/vault/get_secret", &wire::PathRequest { token, path })
            .await?;
        decode_secret(payload)
    }

    pub async fn list_secrets(&self) -> Result<Vec<String>> {
        let token = self.require_token()?;
        let payload: wire::ListSecretsResponse = self
            .post("/v1/vault/list_secrets", &wire::TokenRequest { token })
            .await?;
        Ok(payload.paths)
    }

    /// Store `value` as the next version of `path`.
    ///
    /// With `file_path` set the ciphertext is offloaded to the server's blob
    /// store under that name.
    pub async fn save_secret(
        &self,
        path: &str,
        description: &str,
        value: &[u8],
        expired_at: OffsetDateTime,
        file_path: Option<&str>,
    ) -> Result<SaveSecretResponse> {
        let token = self.require_token()?;
        let body = wire::SaveSecretRequest {
            token,
            path,
            description,
            value: STANDARD.encode(value),
            encoding: ValueEncoding::Base64,
            expired_at,
            file_path,
        };
        self.post("/v1/vault/save_secret", &body).await
    }

    pub async fn delete_secret(&self, path: &str) -> Result<()> {
        self.ack("/v1/vault/delete_secret", path).await
    }

    pub async fn destroy_secret(&self, path: &str) -> Result<()> {
        self.ack("/v1/vault/destroy_secret", path).await
    }

    pub async fn delete_metadata(&self, path: &str) -> Result<()> {
        self.ack("/v1/vault/delete_metadata", path).await
    }

    pub async fn undelete_secret(&self, path: &str, version: i64) -> Result<()> {
        let token = self.require_token()?;
        let _: wire::AckResponse = self
            .post(
                "/v1/vault/undelete_secret",
                &wire::UndeleteRequest {
                    token,
                    path,
                    version,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn list_versions(&self, path: &str) -> Result<Vec<VersionEntry>> {
        let token = self.require_token()?;
        let payload: wire::VersionsResponse = self
            .post("/v1/vault/list_versions", &wire::PathRequest { token, path })
            .await?;
        Ok(payload.versions)
    }

    async fn ack(&self, endpoint: &str, path: &str) -> Result<()> {
        let token = self.require_token()?;
        let _: wire::AckResponse = self
            .post(endpoint, &wire::PathRequest { token, path })
            .await?;
        Ok(())
    }

    fn require_token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| SdkError::InvalidResponse("client is not logged in".into()))
    }

    async fn post<B, T>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|err| SdkError::InvalidResponse(err.to_string()))?;
        let builder = self.client.post(url).timeout(self.timeout).json(body);
        let response = ensure_success(builder.send().await?).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| SdkError::InvalidResponse(err.to_string()))
    }
}

fn decode_secret(payload: wire::SecretResponse) -> Result<Secret> {
    let value = match payload.encoding {
        ValueEncoding::Base64 => STANDARD
            .decode(payload.value.as_bytes())
            .map_err(|err| SdkError::InvalidResponse(format!("invalid base64 value: {err}")))?,
        ValueEncoding::Utf8 => payload.value.into_bytes(),
    };
    Ok(Secret {
        path: payload.path,
        description: payload.description,
        value,
        expired_at: payload.expired_at,
        version: payload.version,
        deleted_at: payload.deleted_at,
        file_path: payload.file_path,
        created_at: payload.created_at,
    })
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let bytes = response.bytes().await?;
    if let Ok(err) = serde_json::from_slice::<wire::ApiError>(&bytes) {
        return Err(SdkError::Api {
            status: status.as_u16(),
            error: err.error,
            message: err.message,
        });
    }

    let body = String::from_utf8_lossy(&bytes).to_string();
    Err(SdkError::InvalidResponse(format!("http {status}: {body}")))
}
