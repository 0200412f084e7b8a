use crate::blob::BlobStore;
use crate::crypto::CryptoEngine;
use crate::errors::{Error, Result};
use crate::store::SecretStore;
use crate::types::{
    DecryptedSecret, MAX_DESCRIPTION_LEN, NewSecretVersion, SaveSecret, SavedSecret, UserId,
    VersionSummary, validate_external_name, validate_path,
};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Default upper bound for a single secret payload.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Plaintext sealed into the version row when the payload lives in the blob store.
const EXTERNAL_MARKER: &[u8] = b"keeper:external";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultLimits {
    pub max_payload_bytes: usize,
}

impl Default for VaultLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Key under which the offloaded payload of one version row is stored.
///
/// The caller's external name is kept as the last segment; the row identity
/// in front of it keeps every version's blob apart.
pub fn blob_key(user_id: UserId, metadata_id: i64, version: i64, external_name: &str) -> String {
    format!("{user_id}/{metadata_id}/v{version}/{external_name}")
}

/// Secret lifecycle façade pairing a [`SecretStore`] with the crypto engine
/// and an optional [`BlobStore`].
#[derive(Clone)]
pub struct VaultService {
    store: Arc<dyn SecretStore>,
    crypto: Arc<CryptoEngine>,
    blobs: Option<Arc<dyn BlobStore>>,
    limits: VaultLimits,
}

impl VaultService {
    pub fn new(store: Arc<dyn SecretStore>, crypto: Arc<CryptoEngine>) -> Self {
        Self {
            store,
            crypto,
            blobs: None,
            limits: VaultLimits::default(),
        }
    }

    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn with_limits(mut self, limits: VaultLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> VaultLimits {
        self.limits
    }

    /// Encrypts and stores a new version of `request.path`.
    pub async fn save(&self, user_id: UserId, request: SaveSecret) -> Result<SavedSecret> {
        self.validate_save(&request)?;

        let sealed = self.crypto.encode(&request.payload)?;
        let (content, offload) = match &request.external_name {
            Some(name) => {
                let blobs = self.blob_store()?;
                let marker = self.crypto.encode(EXTERNAL_MARKER)?;
                (marker, Some((blobs, name.clone())))
            }
            None => (sealed.clone(), None),
        };

        let mut tx = self.store.begin().await?;
        let metadata = tx
            .upsert_metadata(
                user_id,
                &request.path,
                &request.description,
                request.expired_at,
            )
            .await?;
        let version = tx
            .insert_next_version(
                metadata.id,
                NewSecretVersion {
                    content,
                    file_path: offload.as_ref().map(|(_, name)| name.clone()),
                },
            )
            .await?;
        let written = match &offload {
            Some((blobs, name)) => {
                let key = blob_key(user_id, metadata.id, version.version, name);
                blobs.save(&key, &sealed).await?;
                Some((blobs, key))
            }
            None => None,
        };
        if let Err(err) = tx.commit().await {
            if let Some((blobs, key)) = written {
                if let Err(cleanup) = blobs.delete(&key).await {
                    warn!(user_id, blob = %key, error = %cleanup, "orphaned blob left behind");
                }
            }
            return Err(err);
        }

        info!(
            user_id,
            path = %request.path,
            version = version.version,
            external = offload.is_some(),
            "secret saved"
        );
        Ok(SavedSecret {
            path: request.path,
            version: version.version,
        })
    }

    /// Decrypts the current version of `path`.
    pub async fn get(&self, user_id: UserId, path: &str) -> Result<DecryptedSecret> {
        validate_path(path)?;
        let stored = self
            .store
            .current(user_id, path)
            .await?
            .ok_or_else(|| Error::not_found(format!("secret {path}")))?;

        let sealed = match &stored.version.file_path {
            Some(name) => {
                let key = blob_key(
                    user_id,
                    stored.version.metadata_id,
                    stored.version.version,
                    name,
                );
                self.blob_store()?.load(&key).await?
            }
            None => stored.version.content,
        };
        let value = self.crypto.decode(&sealed)?;

        debug!(user_id, path, version = stored.version.version, "secret read");
        Ok(DecryptedSecret {
            path: stored.metadata.path,
            description: stored.metadata.description,
            value,
            expired_at: stored.metadata.expired_at,
            version: stored.version.version,
            deleted_at: stored.metadata.deleted_at,
            file_path: stored.version.file_path,
            created_at: stored.version.created_at,
        })
    }

    pub async fn list(&self, user_id: UserId) -> Result<Vec<String>> {
        self.store.list_paths(user_id).await
    }

    pub async fn versions(&self, user_id: UserId, path: &str) -> Result<Vec<VersionSummary>> {
        validate_path(path)?;
        let versions = self
            .store
            .versions(user_id, path)
            .await?
            .ok_or_else(|| Error::not_found(format!("secret {path}")))?;
        Ok(versions.iter().map(VersionSummary::from).collect())
    }

    /// Soft-deletes every live version of `path`.
    pub async fn delete(&self, user_id: UserId, path: &str) -> Result<()> {
        validate_path(path)?;
        let mut tx = self.store.begin().await?;
        let affected = tx.soft_delete_live(user_id, path).await?;
        if affected == 0 {
            return Err(Error::not_found(format!("secret {path}")));
        }
        tx.commit().await?;
        info!(user_id, path, affected, "secret deleted");
        Ok(())
    }

    /// Irreversibly purges every version of `path`.
    pub async fn destroy(&self, user_id: UserId, path: &str) -> Result<()> {
        validate_path(path)?;
        let mut tx = self.store.begin().await?;
        let destroyed = tx.destroy_versions(user_id, path).await?;
        if destroyed.is_empty() {
            return Err(Error::not_found(format!("secret {path}")));
        }
        tx.commit().await?;
        info!(user_id, path, versions = destroyed.len(), "secret destroyed");

        let keys: Vec<String> = destroyed
            .iter()
            .filter_map(|entry| {
                entry
                    .file_path
                    .as_deref()
                    .map(|name| blob_key(user_id, entry.metadata_id, entry.version, name))
            })
            .collect();
        if keys.is_empty() {
            return Ok(());
        }
        let Some(blobs) = &self.blobs else {
            warn!(user_id, path, "destroyed offloaded versions without a blob store");
            return Ok(());
        };
        for key in keys {
            if let Err(err) = blobs.delete(&key).await {
                warn!(user_id, path, blob = %key, error = %err, "failed to delete blob");
            }
        }
        Ok(())
    }

    /// Soft-deletes the metadata row of `path`.
    pub async fn delete_metadata(&self, user_id: UserId, path: &str) -> Result<()> {
        validate_path(path)?;
        let mut tx = self.store.begin().await?;
        if !tx.delete_metadata(user_id, path).await? {
            return Err(Error::not_found(format!("metadata {path}")));
        }
        tx.commit().await?;
        info!(user_id, path, "metadata deleted");
        Ok(())
    }

    /// Restores one soft-deleted version.
    pub async fn undelete(&self, user_id: UserId, path: &str, version: i64) -> Result<()> {
        validate_path(path)?;
        if version < 1 {
            return Err(Error::validation("version", "must be positive"));
        }
        let mut tx = self.store.begin().await?;
        if !tx.undelete_version(user_id, path, version).await? {
            return Err(Error::not_found(format!("version {version} of {path}")));
        }
        tx.commit().await?;
        info!(user_id, path, version, "version restored");
        Ok(())
    }

    fn validate_save(&self, request: &SaveSecret) -> Result<()> {
        validate_path(&request.path)?;
        if request.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(Error::validation(
                "description",
                format!("must be at most {MAX_DESCRIPTION_LEN} characters"),
            ));
        }
        if request.payload.len() > self.limits.max_payload_bytes {
            return Err(Error::validation(
                "value",
                format!(
                    "payload exceeds {} bytes",
                    self.limits.max_payload_bytes
                ),
            ));
        }
        if request.expired_at <= OffsetDateTime::now_utc() {
            return Err(Error::validation("expired_at", "must be in the future"));
        }
        if let Some(name) = &request.external_name {
            validate_external_name(name)?;
        }
        Ok(())
    }

    fn blob_store(&self) -> Result<Arc<dyn BlobStore>> {
        self.blobs
            .clone()
            .ok_or_else(|| Error::validation("file_path", "blob storage is not configured"))
    }
}

impl std::fmt::Debug for VaultService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultService")
            .field("crypto", &self.crypto)
            .field("blobs", &self.blobs.is_some())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
