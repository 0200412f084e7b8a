//! Offload store for large ciphertexts.
//!
//! Blob names are relative keys such as `"42/7/v3/certs/server.pem"`; the
//! vault prefixes every caller-chosen name with the owning user id and the
//! version row it belongs to.

use crate::errors::{Error, Result};
use crate::types::validate_external_name;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<()>;
    async fn load(&self, name: &str) -> Result<Vec<u8>>;
    async fn delete(&self, name: &str) -> Result<()>;
}

#[async_trait]
impl<T> BlobStore for Arc<T>
where
    T: BlobStore + ?Sized,
{
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
        (**self).save(name, bytes).await
    }
    async fn load(&self, name: &str) -> Result<Vec<u8>> {
        (**self).load(name).await
    }
    async fn delete(&self, name: &str) -> Result<()> {
        (**self).delete(name).await
    }
}

/// Process-local blob store.
#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.blobs.read().await.contains_key(name)
    }

    /// Stored names in lexicographic order.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.blobs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
        validate_external_name(name)?;
        self.blobs
            .write()
            .await
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("blob {name}")))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.blobs.write().await.remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(format!("blob {name}"))),
        }
    }
}

/// Blob store rooted in a local directory.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        validate_external_name(name)?;
        Ok(self.root.join(name))
    }
}

fn map_io(name: &str, err: std::io::Error) -> Error {
    if err.kind() == ErrorKind::NotFound {
        Error::not_found(format!("blob {name}"))
    } else {
        Error::Storage(format!("blob {name}: {err}"))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| map_io(name, err))?;
        }
        // Write to a sibling temp file so readers never see a partial blob.
        let mut tmp = path.clone().into_os_string();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|err| map_io(name, err))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|err| map_io(name, err))?;
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;
        tokio::fs::read(&path).await.map_err(|err| map_io(name, err))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|err| map_io(name, err))
    }
}
