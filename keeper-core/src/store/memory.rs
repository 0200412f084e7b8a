//! Process-local store used by development servers and tests.

use super::{CredentialStore, CredentialTx, SecretStore, SecretTx};
use crate::errors::{Error, Result};
use crate::types::{
    AccessToken, DestroyedVersion, NewAccessToken, NewSecretVersion, SecretMetadata,
    SecretVersion, StoredSecret, User, UserId,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    last_id: i64,
    users: BTreeMap<UserId, User>,
    tokens: Vec<AccessToken>,
    metadata: BTreeMap<i64, SecretMetadata>,
    versions: BTreeMap<i64, SecretVersion>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn metadata_for(&self, user_id: UserId, path: &str) -> Option<&SecretMetadata> {
        self.metadata
            .values()
            .find(|meta| meta.user_id == user_id && meta.path == path)
    }

    fn metadata_id(&self, user_id: UserId, path: &str) -> Option<i64> {
        self.metadata_for(user_id, path).map(|meta| meta.id)
    }

    fn versions_of(&self, metadata_id: i64) -> Vec<&SecretVersion> {
        let mut versions: Vec<_> = self
            .versions
            .values()
            .filter(|version| version.metadata_id == metadata_id)
            .collect();
        versions.sort_by_key(|version| version.version);
        versions
    }

    fn versions_of_mut(&mut self, metadata_id: i64) -> impl Iterator<Item = &mut SecretVersion> {
        self.versions
            .values_mut()
            .filter(move |version| version.metadata_id == metadata_id)
    }
}

/// In-memory implementation of [`CredentialStore`] and [`SecretStore`].
///
/// Transactions are serialized on one async mutex and operate on a staged
/// copy of the state that replaces the shared state on commit. The copy is
/// the whole state, so every write costs O(total rows); development use only.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn begin_tx(&self) -> MemoryTx {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        MemoryTx { guard, staged }
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

impl MemoryTx {
    fn publish(mut self) {
        *self.guard = self.staged;
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn CredentialTx>> {
        Ok(Box::new(self.begin_tx().await))
    }
}

#[async_trait]
impl CredentialTx for MemoryTx {
    async fn create_user(&mut self, login: &str, password_hash: &str) -> Result<User> {
        if self.staged.users.values().any(|user| user.login == login) {
            return Err(Error::validation("login", "login already exists"));
        }
        let user = User {
            id: self.staged.next_id(),
            login: login.to_string(),
            password_hash: password_hash.to_string(),
        };
        self.staged.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_login(&mut self, login: &str) -> Result<Option<User>> {
        Ok(self
            .staged
            .users
            .values()
            .find(|user| user.login == login)
            .cloned())
    }

    async fn find_valid_token(
        &mut self,
        user_id: UserId,
        now: OffsetDateTime,
    ) -> Result<Option<AccessToken>> {
        Ok(self
            .staged
            .tokens
            .iter()
            .filter(|token| token.user_id == user_id && token.is_valid_at(now))
            .max_by_key(|token| (token.created_at, token.id))
            .cloned())
    }

    async fn insert_token(&mut self, token: NewAccessToken) -> Result<AccessToken> {
        if !self.staged.users.contains_key(&token.user_id) {
            return Err(Error::storage(format!("unknown user {}", token.user_id)));
        }
        let stored = AccessToken {
            id: self.staged.next_id(),
            user_id: token.user_id,
            token: token.token,
            expires_at: token.expires_at,
            created_at: OffsetDateTime::now_utc(),
        };
        self.staged.tokens.push(stored.clone());
        Ok(stored)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.publish();
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn SecretTx>> {
        Ok(Box::new(self.begin_tx().await))
    }

    async fn current(&self, user_id: UserId, path: &str) -> Result<Option<StoredSecret>> {
        let state = self.state.lock().await;
        let Some(metadata) = state.metadata_for(user_id, path) else {
            return Ok(None);
        };
        let current = state
            .versions_of(metadata.id)
            .into_iter()
            .filter(|version| version.is_live())
            .max_by_key(|version| version.version)
            .cloned();
        Ok(current.map(|version| StoredSecret {
            metadata: metadata.clone(),
            version,
        }))
    }

    async fn list_paths(&self, user_id: UserId) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let mut paths: Vec<String> = state
            .metadata
            .values()
            .filter(|meta| meta.user_id == user_id && meta.deleted_at.is_none())
            .map(|meta| meta.path.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn versions(&self, user_id: UserId, path: &str) -> Result<Option<Vec<SecretVersion>>> {
        let state = self.state.lock().await;
        Ok(state
            .metadata_id(user_id, path)
            .map(|id| state.versions_of(id).into_iter().cloned().collect()))
    }
}

#[async_trait]
impl SecretTx for MemoryTx {
    async fn upsert_metadata(
        &mut self,
        user_id: UserId,
        path: &str,
        description: &str,
        expired_at: OffsetDateTime,
    ) -> Result<SecretMetadata> {
        let now = OffsetDateTime::now_utc();
        if let Some(id) = self.staged.metadata_id(user_id, path) {
            let meta = self
                .staged
                .metadata
                .get_mut(&id)
                .ok_or_else(|| Error::storage("metadata index out of sync"))?;
            meta.description = description.to_string();
            meta.expired_at = expired_at;
            meta.deleted_at = None;
            meta.updated_at = now;
            return Ok(meta.clone());
        }

        let meta = SecretMetadata {
            id: self.staged.next_id(),
            user_id,
            path: path.to_string(),
            description: description.to_string(),
            expired_at,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.staged.metadata.insert(meta.id, meta.clone());
        Ok(meta)
    }

    async fn insert_next_version(
        &mut self,
        metadata_id: i64,
        version: NewSecretVersion,
    ) -> Result<SecretVersion> {
        if !self.staged.metadata.contains_key(&metadata_id) {
            return Err(Error::storage(format!("unknown metadata {metadata_id}")));
        }
        let next = self
            .staged
            .versions_of(metadata_id)
            .last()
            .map(|latest| latest.version + 1)
            .unwrap_or(1);
        let row = SecretVersion {
            id: self.staged.next_id(),
            metadata_id,
            version: next,
            content: version.content,
            file_path: version.file_path,
            destroyed: false,
            created_at: OffsetDateTime::now_utc(),
            deleted_at: None,
        };
        self.staged.versions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn soft_delete_live(&mut self, user_id: UserId, path: &str) -> Result<u64> {
        let Some(id) = self.staged.metadata_id(user_id, path) else {
            return Ok(0);
        };
        let now = OffsetDateTime::now_utc();
        let mut affected = 0;
        for version in self.staged.versions_of_mut(id) {
            if version.is_live() {
                version.deleted_at = Some(now);
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn destroy_versions(
        &mut self,
        user_id: UserId,
        path: &str,
    ) -> Result<Vec<DestroyedVersion>> {
        let Some(id) = self.staged.metadata_id(user_id, path) else {
            return Ok(Vec::new());
        };
        let now = OffsetDateTime::now_utc();
        let mut destroyed = Vec::new();
        for version in self.staged.versions_of_mut(id) {
            if version.destroyed {
                continue;
            }
            version.content.clear();
            version.destroyed = true;
            version.deleted_at = Some(now);
            destroyed.push(DestroyedVersion {
                metadata_id: version.metadata_id,
                version: version.version,
                file_path: version.file_path.clone(),
            });
        }
        destroyed.sort_by_key(|entry| entry.version);
        Ok(destroyed)
    }

    async fn delete_metadata(&mut self, user_id: UserId, path: &str) -> Result<bool> {
        let Some(id) = self.staged.metadata_id(user_id, path) else {
            return Ok(false);
        };
        match self.staged.metadata.get_mut(&id) {
            Some(meta) if meta.deleted_at.is_none() => {
                let now = OffsetDateTime::now_utc();
                meta.deleted_at = Some(now);
                meta.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn undelete_version(
        &mut self,
        user_id: UserId,
        path: &str,
        version: i64,
    ) -> Result<bool> {
        let Some(id) = self.staged.metadata_id(user_id, path) else {
            return Ok(false);
        };
        let target = self
            .staged
            .versions_of_mut(id)
            .find(|row| row.version == version && !row.destroyed && row.deleted_at.is_some());
        match target {
            Some(row) => {
                row.deleted_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.publish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn future() -> OffsetDateTime {
        OffsetDateTime::now_utc() + Duration::hours(1)
    }

    async fn save(store: &MemoryStore, user: UserId, path: &str, content: &[u8]) -> i64 {
        let mut tx = SecretStore::begin(store).await.unwrap();
        let meta = tx.upsert_metadata(user, path, "", future()).await.unwrap();
        let version = tx
            .insert_next_version(
                meta.id,
                NewSecretVersion {
                    content: content.to_vec(),
                    file_path: None,
                },
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();
        version.version
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        {
            let mut tx = SecretStore::begin(&store).await.unwrap();
            tx.upsert_metadata(1, "db/prod", "", future()).await.unwrap();
        }
        assert!(store.list_paths(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn versions_are_monotonic_per_path() {
        let store = MemoryStore::new();
        assert_eq!(save(&store, 1, "a", b"x").await, 1);
        assert_eq!(save(&store, 1, "a", b"y").await, 2);
        assert_eq!(save(&store, 1, "b", b"z").await, 1);
        assert_eq!(save(&store, 2, "a", b"w").await, 1);

        let current = store.current(1, "a").await.unwrap().unwrap();
        assert_eq!(current.version.version, 2);
        assert_eq!(current.version.content, b"y");
    }

    #[tokio::test]
    async fn destroyed_versions_never_come_back() {
        let store = MemoryStore::new();
        save(&store, 1, "a", b"x").await;
        save(&store, 1, "a", b"y").await;

        let mut tx = SecretStore::begin(&store).await.unwrap();
        let destroyed = tx.destroy_versions(1, "a").await.unwrap();
        assert_eq!(destroyed.len(), 2);
        assert!(!tx.undelete_version(1, "a", 1).await.unwrap());
        tx.commit().await.unwrap();

        let versions = store.versions(1, "a").await.unwrap().unwrap();
        assert!(versions.iter().all(|v| v.destroyed && v.content.is_empty()));
        assert!(store.current(1, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn login_uniqueness_is_enforced() {
        let store = MemoryStore::new();
        let mut tx = CredentialStore::begin(&store).await.unwrap();
        tx.create_user("alice", "hash").await.unwrap();
        let err = tx.create_user("alice", "hash").await.unwrap_err();
        assert!(matches!(err, Error::Validation { field: "login", .. }));
    }

    #[tokio::test]
    async fn newest_valid_token_is_reused() {
        let store = MemoryStore::new();
        let mut tx = CredentialStore::begin(&store).await.unwrap();
        let user = tx.create_user("bob", "hash").await.unwrap();
        let now = OffsetDateTime::now_utc();
        tx.insert_token(NewAccessToken {
            user_id: user.id,
            token: "expired".into(),
            expires_at: now - Duration::seconds(1),
        })
        .await
        .unwrap();
        tx.insert_token(NewAccessToken {
            user_id: user.id,
            token: "live".into(),
            expires_at: now + Duration::hours(1),
        })
        .await
        .unwrap();
        let found = tx.find_valid_token(user.id, now).await.unwrap().unwrap();
        assert_eq!(found.token, "live");
    }
}
