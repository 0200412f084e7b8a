use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use keeper_core::{AccessToken, DecryptedSecret, VersionSummary};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::auth::TokenBearer;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueEncoding {
    Utf8,
    #[default]
    Base64,
}

impl ValueEncoding {
    pub fn decode(self, value: &str) -> Result<Vec<u8>, AppError> {
        match self {
            ValueEncoding::Utf8 => Ok(value.as_bytes().to_vec()),
            ValueEncoding::Base64 => STANDARD
                .decode(value.as_bytes())
                .or_else(|_| STANDARD_NO_PAD.decode(value.as_bytes()))
                .map_err(|err| AppError::bad_request(format!("invalid base64 value: {err}"))),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl AuthResponse {
    pub fn issued(message: &str, token: AccessToken) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            token: token.token,
            expires_at: token.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSecretRequest {
    #[serde(default)]
    pub token: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretResponse {
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

impl From<DecryptedSecret> for SecretResponse {
    fn from(secret: DecryptedSecret) -> Self {
        Self {
            value: STANDARD.encode(&secret.value),
            encoding: ValueEncoding::Base64,
            path: secret.path,
            description: secret.description,
            expired_at: secret.expired_at,
            version: secret.version,
            deleted_at: secret.deleted_at,
            file_path: secret.file_path,
            created_at: secret.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSecretsRequest {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSecretsResponse {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveSecretRequest {
    #[serde(default)]
    pub token: Option<String>,
    pub path: String,
    #[serde(default)]
    pub description: String,
    pub value: String,
    #[serde(default)]
    pub encoding: ValueEncoding,
    #[serde(with = "time::serde::rfc3339")]
    pub expired_at: OffsetDateTime,
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveSecretResponse {
    pub success: bool,
    pub message: String,
    pub path: String,
    pub version: i64,
}

/// Body shared by the operations that address a whole path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRequest {
    #[serde(default)]
    pub token: Option<String>,
    pub path: String,
}

pub type DeleteSecretRequest = PathRequest;
pub type DestroySecretRequest = PathRequest;
pub type DeleteMetadataRequest = PathRequest;
pub type ListVersionsRequest = PathRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndeleteSecretRequest {
    #[serde(default)]
    pub token: Option<String>,
    pub path: String,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

impl AckResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionsResponse {
    pub path: String,
    pub versions: Vec<VersionSummary>,
}

impl TokenBearer for GetSecretRequest {
    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

impl TokenBearer for ListSecretsRequest {
    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

impl TokenBearer for SaveSecretRequest {
    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

impl TokenBearer for PathRequest {
    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

impl TokenBearer for UndeleteSecretRequest {
    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings_decode_values() {
        assert_eq!(ValueEncoding::Utf8.decode("plain").unwrap(), b"plain");
        assert_eq!(ValueEncoding::Base64.decode("aGk=").unwrap(), b"hi");
        assert_eq!(ValueEncoding::Base64.decode("aGk").unwrap(), b"hi");
        assert!(ValueEncoding::Base64.decode("***").is_err());
    }

    #[test]
    fn save_request_defaults_to_base64() {
        let request: SaveSecretRequest = serde_json::from_value(serde_json::json!({
            "token": "t",
            "path": "db/prod",
            "value": "aGk=",
            "expired_at": "2099-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(request.encoding, ValueEncoding::Base64);
        assert_eq!(request.token(), Some("t"));
        assert!(request.file_path.is_none());
    }

    #[test]
    fn auth_request_debug_hides_password() {
        let request = AuthRequest {
            login: "alice".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{request:?}").contains("hunter2"));
    }
}
