use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

pub type UserId = i64;

pub(crate) const MAX_PATH_LEN: usize = 512;
pub(crate) const MAX_DESCRIPTION_LEN: usize = 1024;
pub(crate) const MAX_EXTERNAL_NAME_LEN: usize = 255;

/// Validates a secret path: non-empty, bounded, free of control characters.
pub(crate) fn validate_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::validation("path", "must not be empty"));
    }
    if path.chars().count() > MAX_PATH_LEN {
        return Err(Error::validation(
            "path",
            format!("must be at most {MAX_PATH_LEN} characters"),
        ));
    }
    if path.chars().any(char::is_control) {
        return Err(Error::validation("path", "contains control characters"));
    }
    Ok(())
}

/// Validates a caller-chosen blob name: a relative name without traversal.
pub(crate) fn validate_external_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("file_path", "must not be empty"));
    }
    if name.len() > MAX_EXTERNAL_NAME_LEN {
        return Err(Error::validation(
            "file_path",
            format!("must be at most {MAX_EXTERNAL_NAME_LEN} bytes"),
        ));
    }
    if name.starts_with('/') || name.starts_with('\\') {
        return Err(Error::validation("file_path", "must be relative"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(Error::validation("file_path", "contains invalid characters"));
    }
    if name.split('/').any(|segment| segment.is_empty() || segment == "..") {
        return Err(Error::validation("file_path", "contains an invalid segment"));
    }
    Ok(())
}

/// Registered account.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub password_hash: String,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

/// Token row to be inserted by a [`crate::store::CredentialTx`].
#[derive(Clone, PartialEq, Eq)]
pub struct NewAccessToken {
    pub user_id: UserId,
    pub token: String,
    pub expires_at: OffsetDateTime,
}

/// Issued session token as persisted in the token table.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub id: i64,
    pub user_id: UserId,
    pub token: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl AccessToken {
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at > now
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Per-path record holding description, TTL and the path-wide delete marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMetadata {
    pub id: i64,
    pub user_id: UserId,
    pub path: String,
    pub description: String,
    pub expired_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Lifecycle state of a single version row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    Active,
    SoftDeleted,
    Destroyed,
}

impl VersionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionState::Active => "active",
            VersionState::SoftDeleted => "soft_deleted",
            VersionState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One write to a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretVersion {
    pub id: i64,
    pub metadata_id: i64,
    pub version: i64,
    pub content: Vec<u8>,
    pub file_path: Option<String>,
    pub destroyed: bool,
    pub created_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

impl SecretVersion {
    pub fn state(&self) -> VersionState {
        if self.destroyed {
            VersionState::Destroyed
        } else if self.deleted_at.is_some() {
            VersionState::SoftDeleted
        } else {
            VersionState::Active
        }
    }

    pub fn is_live(&self) -> bool {
        self.state() == VersionState::Active
    }
}

/// Content of the next version row; the store assigns the number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSecretVersion {
    pub content: Vec<u8>,
    pub file_path: Option<String>,
}

/// Current version joined with its metadata row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSecret {
    pub metadata: SecretMetadata,
    pub version: SecretVersion,
}

/// Version history entry without content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub version: i64,
    pub state: VersionState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    pub external: bool,
}

impl From<&SecretVersion> for VersionSummary {
    fn from(value: &SecretVersion) -> Self {
        Self {
            version: value.version,
            state: value.state(),
            created_at: value.created_at,
            deleted_at: value.deleted_at,
            external: value.file_path.is_some(),
        }
    }
}

/// Offloaded blob of a version that was destroyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyedVersion {
    pub metadata_id: i64,
    pub version: i64,
    pub file_path: Option<String>,
}

/// Input of [`crate::vault::VaultService::save`].
#[derive(Clone, PartialEq, Eq)]
pub struct SaveSecret {
    pub path: String,
    pub description: String,
    pub payload: Vec<u8>,
    pub expired_at: OffsetDateTime,
    pub external_name: Option<String>,
}

impl fmt::Debug for SaveSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveSecret")
            .field("path", &self.path)
            .field("payload_len", &self.payload.len())
            .field("expired_at", &self.expired_at)
            .field("external_name", &self.external_name)
            .finish_non_exhaustive()
    }
}

/// Acknowledgement of a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSecret {
    pub path: String,
    pub version: i64,
}

/// Decrypted current version returned by the vault.
#[derive(Clone, PartialEq, Eq)]
pub struct DecryptedSecret {
    pub path: String,
    pub description: String,
    pub value: Vec<u8>,
    pub expired_at: OffsetDateTime,
    pub version: i64,
    pub deleted_at: Option<OffsetDateTime>,
    pub file_path: Option<String>,
    pub created_at: OffsetDateTime,
}

impl fmt::Debug for DecryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedSecret")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("expired_at", &self.expired_at)
            .field("deleted_at", &self.deleted_at)
            .field("file_path", &self.file_path)
            .finish_non_exhaustive()
    }
}
