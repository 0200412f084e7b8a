//! Domain core of the keeper vault: payload crypto, credential and secret
//! stores, blob offload, and the secret lifecycle service.

pub mod blob;
pub mod crypto;
pub mod errors;
pub mod store;
pub mod types;
pub mod vault;

pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use crypto::CryptoEngine;
pub use errors::{AuthFailure, Error, Result};
#[cfg(feature = "postgres")]
pub use store::PgStore;
pub use store::{CredentialStore, CredentialTx, MemoryStore, SecretStore, SecretTx};
pub use types::{
    AccessToken, DecryptedSecret, DestroyedVersion, NewAccessToken, NewSecretVersion, SaveSecret,
    SavedSecret, SecretMetadata, SecretVersion, StoredSecret, User, UserId, VersionState,
    VersionSummary,
};
pub use vault::{DEFAULT_MAX_PAYLOAD_BYTES, VaultLimits, VaultService, blob_key};
