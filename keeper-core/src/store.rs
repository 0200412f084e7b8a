//! Persistence seams for credentials and versioned secrets.
//!
//! Every mutation runs through a transaction object obtained from `begin()`.
//! Dropping a transaction without calling `commit()` discards its writes.

use crate::errors::Result;
use crate::types::{
    AccessToken, DestroyedVersion, NewAccessToken, NewSecretVersion, SecretMetadata,
    SecretVersion, StoredSecret, User, UserId,
};
use async_trait::async_trait;
use time::OffsetDateTime;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// Users and the access tokens issued to them.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn CredentialTx>>;
}

#[async_trait]
pub trait CredentialTx: Send {
    /// Fails with a validation error when the login is already taken.
    async fn create_user(&mut self, login: &str, password_hash: &str) -> Result<User>;

    async fn find_user_by_login(&mut self, login: &str) -> Result<Option<User>>;

    /// Newest token of `user_id` that is still valid at `now`.
    async fn find_valid_token(
        &mut self,
        user_id: UserId,
        now: OffsetDateTime,
    ) -> Result<Option<AccessToken>>;

    async fn insert_token(&mut self, token: NewAccessToken) -> Result<AccessToken>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Metadata rows and their numbered versions, scoped per user.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn SecretTx>>;

    /// Highest live version of `path` joined with its metadata row.
    async fn current(&self, user_id: UserId, path: &str) -> Result<Option<StoredSecret>>;

    /// Paths whose metadata row is not soft-deleted, in lexicographic order.
    async fn list_paths(&self, user_id: UserId) -> Result<Vec<String>>;

    /// Full version history ordered by version; `None` if the path is unknown.
    async fn versions(&self, user_id: UserId, path: &str) -> Result<Option<Vec<SecretVersion>>>;
}

#[async_trait]
pub trait SecretTx: Send {
    /// Inserts the metadata row, or refreshes description and expiry and
    /// clears its delete marker when it already exists.
    async fn upsert_metadata(
        &mut self,
        user_id: UserId,
        path: &str,
        description: &str,
        expired_at: OffsetDateTime,
    ) -> Result<SecretMetadata>;

    /// Appends `max(version) + 1` under the metadata row.
    async fn insert_next_version(
        &mut self,
        metadata_id: i64,
        version: NewSecretVersion,
    ) -> Result<SecretVersion>;

    /// Soft-deletes every live version; returns how many rows changed.
    async fn soft_delete_live(&mut self, user_id: UserId, path: &str) -> Result<u64>;

    /// Clears content of every non-destroyed version and marks it destroyed.
    async fn destroy_versions(
        &mut self,
        user_id: UserId,
        path: &str,
    ) -> Result<Vec<DestroyedVersion>>;

    /// Soft-deletes the metadata row; false if absent or already deleted.
    async fn delete_metadata(&mut self, user_id: UserId, path: &str) -> Result<bool>;

    /// Clears the delete marker of one soft-deleted, undestroyed version.
    async fn undelete_version(&mut self, user_id: UserId, path: &str, version: i64)
    -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
