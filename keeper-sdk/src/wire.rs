//! JSON bodies exchanged with the `/v1` endpoints.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueEncoding {
    Utf8,
    #[default]
    Base64,
}

#[derive(Serialize)]
pub(crate) struct AuthRequest<'a> {
    pub login: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Serialize)]
pub(crate) struct TokenRequest<'a> {
    pub token: &'a str,
}

#[derive(Serialize)]
pub(crate) struct PathRequest<'a> {
    pub token: &'a str,
    pub path: &'a str,
}

#[derive(Serialize)]
pub(crate) struct UndeleteRequest<'a> {
    pub token: &'a str,
    pub path: &'a str,
    pub version: i64,
}

#[derive(Serialize)]
pub(crate) struct SaveSecretRequest<'a> {
    pub token: &'a str,
    pub path: &'a str,
    pub description: &'a str,
    pub value: String,
    pub encoding: ValueEncoding,
    #[serde(with = "time::serde::rfc3339")]
    pub expired_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveSecretResponse {
    pub success: bool,
    pub message: String,
    pub path: String,
    pub version: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SecretResponse {
    pub path: String,
    pub description: String,
    pub value: String,
    pub encoding: ValueEncoding,
    #[serde(with = "time::serde::rfc3339")]
    pub expired_at: OffsetDateTime,
    pub version: i64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Decrypted secret; `value` holds the raw payload bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    pub path: String,
    pub description: String,
    pub value: Vec<u8>,
    pub expired_at: OffsetDateTime,
    pub version: i64,
    pub deleted_at: Option<OffsetDateTime>,
    pub file_path: Option<String>,
    pub created_at: OffsetDateTime,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("file_path", &self.file_path)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ListSecretsResponse {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    Active,
    SoftDeleted,
    Destroyed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionEntry {
    pub version: i64,
    pub state: VersionState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    pub external: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct VersionsResponse {
    pub versions: Vec<VersionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AckResponse {
    #[allow(dead_code)]
    pub success: bool,
}

/// Error body returned by the server on every non-2xx response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}
