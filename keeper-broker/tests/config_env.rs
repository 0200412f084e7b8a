use std::io::Write;

use keeper_broker::config::{BlobBackend, KeeperConfig, LogFormat, StorageBackend};
use serial_test::serial;

const VARS: &[&str] = &[
    "KEEPER__SERVER__BIND",
    "KEEPER__STORAGE__BACKEND",
    "DATABASE_URL",
    "KEEPER__BLOB__BACKEND",
    "KEEPER_SIGNING_KEY",
    "KEEPER_DATA_ENCRYPTION_KEY",
    "KEEPER__TELEMETRY__LOG_FORMAT",
];

fn clear_env() {
    for var in VARS {
        // SAFETY: tests in this file run serially and own the process environment.
        unsafe { std::env::remove_var(var) };
    }
}

fn set_env(key: &str, value: &str) {
    // SAFETY: see `clear_env`.
    unsafe { std::env::set_var(key, value) };
}

#[test]
#[serial]
fn file_then_environment_layering() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[server]
bind = "127.0.0.1:9000"

[blob]
backend = "file"
root = "/tmp/keeper-blobs"

[security]
signing_key = "from-file"
data_encryption_key = "{}"
"#,
        "ab".repeat(32)
    )
    .unwrap();

    set_env("KEEPER__SERVER__BIND", "127.0.0.1:9100");
    set_env("KEEPER_SIGNING_KEY", "from-env");
    set_env("KEEPER__TELEMETRY__LOG_FORMAT", "pretty");

    let config = KeeperConfig::load(Some(file.path())).unwrap();
    clear_env();

    assert_eq!(config.server.bind, "127.0.0.1:9100");
    assert_eq!(config.security.signing_key, "from-env");
    assert_eq!(config.blob.backend, BlobBackend::File);
    assert_eq!(config.blob.root, "/tmp/keeper-blobs");
    assert_eq!(config.telemetry.log_format, LogFormat::Pretty);
    config.validate().unwrap();
}

#[test]
#[serial]
fn postgres_backend_requires_a_database_url() {
    clear_env();
    set_env("KEEPER__STORAGE__BACKEND", "postgres");
    set_env("KEEPER_SIGNING_KEY", "k");
    set_env("KEEPER_DATA_ENCRYPTION_KEY", &"00".repeat(32));

    let config = KeeperConfig::load(None).unwrap();
    assert_eq!(config.storage.backend, StorageBackend::Postgres);
    assert!(config.validate().is_err());

    set_env("DATABASE_URL", "postgres://keeper@localhost/keeper");
    let config = KeeperConfig::load(None).unwrap();
    clear_env();
    config.validate().unwrap();
}

#[test]
#[serial]
fn missing_keys_fail_validation() {
    clear_env();
    let config = KeeperConfig::load(None).unwrap();
    assert!(config.validate().is_err());
}

#[tokio::test]
#[serial]
async fn build_state_rejects_a_short_encryption_key() {
    clear_env();
    let mut config = KeeperConfig::default();
    config.security.signing_key = "k".into();
    config.security.data_encryption_key = "abcd".into();
    let err = keeper_broker::build_state(&config).await.err().unwrap();
    assert!(format!("{err:#}").contains("data encryption key"));
}
