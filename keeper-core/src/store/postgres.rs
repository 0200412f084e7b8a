//! PostgreSQL-backed credential and secret store.

use super::{CredentialStore, CredentialTx, SecretStore, SecretTx};
use crate::errors::{Error, Result};
use crate::types::{
    AccessToken, DestroyedVersion, NewAccessToken, NewSecretVersion, SecretMetadata,
    SecretVersion, StoredSecret, User, UserId,
};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, Pool, Postgres, Transaction};
use std::str::FromStr;
use time::OffsetDateTime;
use tracing::info;

/// Embedded schema.
const POSTGRES_SCHEMA: &str = include_str!("schema.sql");

fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

fn db_err(err: sqlx::Error) -> Error {
    Error::Storage(err.to_string())
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    login: String,
    password_hash: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            login: row.login,
            password_hash: row.password_hash,
        }
    }
}

#[derive(FromRow)]
struct TokenRow {
    id: i64,
    user_id: i64,
    token: String,
    expires_at: OffsetDateTime,
    created_at: OffsetDateTime,
}

impl From<TokenRow> for AccessToken {
    fn from(row: TokenRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            token: row.token,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct MetadataRow {
    id: i64,
    user_id: i64,
    title: String,
    description: String,
    expired_at: OffsetDateTime,
    deleted_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<MetadataRow> for SecretMetadata {
    fn from(row: MetadataRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            path: row.title,
            description: row.description,
            expired_at: row.expired_at,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct VersionRow {
    id: i64,
    metadata_id: i64,
    version: i64,
    content: Vec<u8>,
    file_path: Option<String>,
    destroyed: bool,
    created_at: OffsetDateTime,
    deleted_at: Option<OffsetDateTime>,
}

impl From<VersionRow> for SecretVersion {
    fn from(row: VersionRow) -> Self {
        Self {
            id: row.id,
            metadata_id: row.metadata_id,
            version: row.version,
            content: row.content,
            file_path: row.file_path,
            destroyed: row.destroyed,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(FromRow)]
struct CurrentRow {
    #[sqlx(flatten)]
    metadata: MetadataRow,
    version_id: i64,
    version: i64,
    content: Vec<u8>,
    file_path: Option<String>,
    version_created_at: OffsetDateTime,
}

const METADATA_COLUMNS: &str =
    "id, user_id, title, description, expired_at, deleted_at, created_at, updated_at";
const VERSION_COLUMNS: &str =
    "id, metadata_id, version, content, file_path, destroyed, created_at, deleted_at";

/// PostgreSQL store shared by the credential and secret seams.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    /// Connects, then applies the embedded schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let opts = PgConnectOptions::from_str(url).map_err(db_err)?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.migrate().await?;
        info!(max_connections, "connected to postgres");
        Ok(store)
    }

    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        // Prepared statements accept one statement each.
        for statement in schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn begin_tx(&self) -> Result<PgTx> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(PgTx { tx })
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn finish(self) -> Result<()> {
        self.tx.commit().await.map_err(db_err)
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn CredentialTx>> {
        Ok(Box::new(self.begin_tx().await?))
    }
}

#[async_trait]
impl CredentialTx for PgTx {
    async fn create_user(&mut self, login: &str, password_hash: &str) -> Result<User> {
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (login, password_hash) VALUES ($1, $2) \
             RETURNING id, login, password_hash",
        )
        .bind(login)
        .bind(password_hash)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|err| {
            let duplicate = err
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation());
            if duplicate {
                Error::validation("login", "login already exists")
            } else {
                db_err(err)
            }
        })?;
        Ok(row.into())
    }

    async fn find_user_by_login(&mut self, login: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, login, password_hash FROM users WHERE login = $1",
        )
        .bind(login)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn find_valid_token(
        &mut self,
        user_id: UserId,
        now: OffsetDateTime,
    ) -> Result<Option<AccessToken>> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT id, user_id, token, expires_at, created_at FROM access_tokens \
             WHERE user_id = $1 AND expires_at > $2 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn insert_token(&mut self, token: NewAccessToken) -> Result<AccessToken> {
        let row = sqlx::query_as::<_, TokenRow>(
            "INSERT INTO access_tokens (user_id, token, expires_at) VALUES ($1, $2, $3) \
             RETURNING id, user_id, token, expires_at, created_at",
        )
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.expires_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish().await
    }
}

#[async_trait]
impl SecretStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn SecretTx>> {
        Ok(Box::new(self.begin_tx().await?))
    }

    async fn current(&self, user_id: UserId, path: &str) -> Result<Option<StoredSecret>> {
        let row = sqlx::query_as::<_, CurrentRow>(
            "SELECT m.id, m.user_id, m.title, m.description, m.expired_at, m.deleted_at, \
                    m.created_at, m.updated_at, \
                    v.id AS version_id, v.version, v.content, v.file_path, \
                    v.created_at AS version_created_at \
             FROM secrets_metadata m \
             JOIN secret_versions v ON v.metadata_id = m.id \
             WHERE m.user_id = $1 AND m.title = $2 \
               AND v.deleted_at IS NULL AND v.destroyed = FALSE \
             ORDER BY v.version DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|row| {
            let metadata: SecretMetadata = row.metadata.into();
            StoredSecret {
                version: SecretVersion {
                    id: row.version_id,
                    metadata_id: metadata.id,
                    version: row.version,
                    content: row.content,
                    file_path: row.file_path,
                    destroyed: false,
                    created_at: row.version_created_at,
                    deleted_at: None,
                },
                metadata,
            }
        }))
    }

    async fn list_paths(&self, user_id: UserId) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT title FROM secrets_metadata \
             WHERE user_id = $1 AND deleted_at IS NULL ORDER BY title",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn versions(&self, user_id: UserId, path: &str) -> Result<Option<Vec<SecretVersion>>> {
        let metadata_id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM secrets_metadata WHERE user_id = $1 AND title = $2",
        )
        .bind(user_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        let Some(metadata_id) = metadata_id else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, VersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM secret_versions \
             WHERE metadata_id = $1 ORDER BY version"
        ))
        .bind(metadata_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(Some(rows.into_iter().map(Into::into).collect()))
    }
}

#[async_trait]
impl SecretTx for PgTx {
    async fn upsert_metadata(
        &mut self,
        user_id: UserId,
        path: &str,
        description: &str,
        expired_at: OffsetDateTime,
    ) -> Result<SecretMetadata> {
        // DO UPDATE takes the row lock held until commit.
        let row = sqlx::query_as::<_, MetadataRow>(&format!(
            "INSERT INTO secrets_metadata (user_id, title, description, expired_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, title) DO UPDATE \
             SET description = EXCLUDED.description, \
                 expired_at = EXCLUDED.expired_at, \
                 deleted_at = NULL, \
                 updated_at = NOW() \
             RETURNING {METADATA_COLUMNS}"
        ))
        .bind(user_id)
        .bind(path)
        .bind(description)
        .bind(expired_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }

    async fn insert_next_version(
        &mut self,
        metadata_id: i64,
        version: NewSecretVersion,
    ) -> Result<SecretVersion> {
        sqlx::query("SELECT id FROM secrets_metadata WHERE id = $1 FOR UPDATE")
            .bind(metadata_id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;

        let row = sqlx::query_as::<_, VersionRow>(&format!(
            "INSERT INTO secret_versions (metadata_id, version, content, file_path) \
             SELECT $1, COALESCE(MAX(version), 0) + 1, $2, $3 \
             FROM secret_versions WHERE metadata_id = $1 \
             RETURNING {VERSION_COLUMNS}"
        ))
        .bind(metadata_id)
        .bind(&version.content)
        .bind(&version.file_path)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }

    async fn soft_delete_live(&mut self, user_id: UserId, path: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE secret_versions v SET deleted_at = NOW() \
             FROM secrets_metadata m \
             WHERE v.metadata_id = m.id AND m.user_id = $1 AND m.title = $2 \
               AND v.deleted_at IS NULL AND v.destroyed = FALSE",
        )
        .bind(user_id)
        .bind(path)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn destroy_versions(
        &mut self,
        user_id: UserId,
        path: &str,
    ) -> Result<Vec<DestroyedVersion>> {
        let rows: Vec<(i64, i64, Option<String>)> = sqlx::query_as(
            "UPDATE secret_versions v \
             SET content = ''::bytea, destroyed = TRUE, deleted_at = NOW() \
             FROM secrets_metadata m \
             WHERE v.metadata_id = m.id AND m.user_id = $1 AND m.title = $2 \
               AND v.destroyed = FALSE \
             RETURNING v.metadata_id, v.version, v.file_path",
        )
        .bind(user_id)
        .bind(path)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;

        let mut destroyed: Vec<DestroyedVersion> = rows
            .into_iter()
            .map(|(metadata_id, version, file_path)| DestroyedVersion {
                metadata_id,
                version,
                file_path,
            })
            .collect();
        destroyed.sort_by_key(|entry| entry.version);
        Ok(destroyed)
    }

    async fn delete_metadata(&mut self, user_id: UserId, path: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE secrets_metadata SET deleted_at = NOW(), updated_at = NOW() \
             WHERE user_id = $1 AND title = $2 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(path)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn undelete_version(
        &mut self,
        user_id: UserId,
        path: &str,
        version: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE secret_versions v SET deleted_at = NULL \
             FROM secrets_metadata m \
             WHERE v.metadata_id = m.id AND m.user_id = $1 AND m.title = $2 \
               AND v.version = $3 AND v.deleted_at IS NOT NULL AND v.destroyed = FALSE",
        )
        .bind(user_id)
        .bind(path)
        .bind(version)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_splits_into_statements() {
        let statements = schema_statements(POSTGRES_SCHEMA);
        assert_eq!(statements.len(), 5);
        assert!(statements.iter().all(|s| !s.is_empty()));
        assert!(statements[0].contains("CREATE TABLE IF NOT EXISTS users"));
    }
}
