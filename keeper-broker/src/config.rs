use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BIND: &str = "0.0.0.0:8081";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// Server configuration, layered as defaults, TOML file, environment, CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeeperConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub blob: BlobConfig,
    pub security: SecurityConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    pub request_timeout_ms: u64,
    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(anyhow!("unsupported storage backend `{other}`")),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: None,
            max_connections: 10,
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    #[default]
    None,
    Memory,
    File,
}

impl FromStr for BlobBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(anyhow!("unsupported blob backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlobConfig {
    pub backend: BlobBackend,
    pub root: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::None,
            root: "./data/blobs".to_string(),
        }
    }
}

/// Signing and encryption material plus the limits enforced on callers.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    pub signing_key: String,
    pub data_encryption_key: String,
    pub token_ttl_secs: u64,
    pub max_payload_bytes: usize,
    pub password: PasswordConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            signing_key: String::new(),
            data_encryption_key: String::new(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            max_payload_bytes: keeper_core::DEFAULT_MAX_PAYLOAD_BYTES,
            password: PasswordConfig::default(),
        }
    }
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("signing_key", &"<redacted>")
            .field("data_encryption_key", &"<redacted>")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("password", &self.password)
            .finish()
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(anyhow!("unsupported log format `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,
}

impl KeeperConfig {
    /// Defaults, then the optional TOML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("failed to parse TOML configuration")
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = var("KEEPER__SERVER__BIND") {
            self.server.bind = value;
        }
        if let Some(value) = var("KEEPER__SERVER__REQUEST_TIMEOUT_MS") {
            self.server.request_timeout_ms = value
                .trim()
                .parse()
                .context("KEEPER__SERVER__REQUEST_TIMEOUT_MS must be an integer")?;
        }
        if let Some(value) = var("KEEPER__STORAGE__BACKEND") {
            self.storage.backend = value.parse()?;
        }
        if let Some(value) = var("DATABASE_URL") {
            self.storage.database_url = Some(value);
        }
        if let Some(value) = var("KEEPER__BLOB__BACKEND") {
            self.blob.backend = value.parse()?;
        }
        if let Some(value) = var("KEEPER__BLOB__ROOT") {
            self.blob.root = value;
        }
        if let Some(value) = var("KEEPER_SIGNING_KEY") {
            self.security.signing_key = value;
        }
        if let Some(value) = var("KEEPER_DATA_ENCRYPTION_KEY") {
            self.security.data_encryption_key = value;
        }
        if let Some(value) = var("KEEPER__SECURITY__TOKEN_TTL_SECS") {
            self.security.token_ttl_secs = value
                .trim()
                .parse()
                .context("KEEPER__SECURITY__TOKEN_TTL_SECS must be an integer")?;
        }
        if let Some(value) = var("KEEPER__TELEMETRY__LOG_FORMAT") {
            self.telemetry.log_format = value.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.bind.trim().is_empty() {
            bail!("server.bind must not be empty");
        }
        if self.server.request_timeout_ms == 0 {
            bail!("server.request_timeout_ms must be greater than zero");
        }
        if self.server.max_request_bytes == 0 {
            bail!("server.max_request_bytes must be greater than zero");
        }
        if self.storage.backend == StorageBackend::Postgres
            && self
                .storage
                .database_url
                .as_deref()
                .is_none_or(|url| url.trim().is_empty())
        {
            bail!("storage.database_url (DATABASE_URL) is required for the postgres backend");
        }
        if self.blob.backend == BlobBackend::File && self.blob.root.trim().is_empty() {
            bail!("blob.root must be set for the file blob backend");
        }
        if self.security.signing_key.trim().is_empty() {
            bail!("security.signing_key (KEEPER_SIGNING_KEY) is required");
        }
        if self.security.data_encryption_key.trim().is_empty() {
            bail!("security.data_encryption_key (KEEPER_DATA_ENCRYPTION_KEY) is required");
        }
        if self.security.token_ttl_secs == 0 {
            bail!("security.token_ttl_secs must be greater than zero");
        }
        if self.security.max_payload_bytes == 0 {
            bail!("security.max_payload_bytes must be greater than zero");
        }
        Ok(())
    }
}
