use keeper_core::{BlobStore, Error, FileBlobStore};
use tempfile::tempdir;

#[tokio::test]
async fn file_blob_store_round_trip() {
    let dir = tempdir().unwrap();
    let store = FileBlobStore::new(dir.path());

    store.save("42/certs/server.pem", b"sealed").await.unwrap();
    assert!(dir.path().join("42/certs/server.pem").exists());
    assert_eq!(store.load("42/certs/server.pem").await.unwrap(), b"sealed");

    store.save("42/certs/server.pem", b"replaced").await.unwrap();
    assert_eq!(store.load("42/certs/server.pem").await.unwrap(), b"replaced");

    store.delete("42/certs/server.pem").await.unwrap();
    assert!(
        store
            .load("42/certs/server.pem")
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert!(
        store
            .delete("42/certs/server.pem")
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn file_blob_store_stays_inside_root() {
    let dir = tempdir().unwrap();
    let store = FileBlobStore::new(dir.path().join("blobs"));

    for name in ["../outside", "/etc/passwd", "a/../../b", ""] {
        let err = store.save(name, b"x").await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }), "{name}: {err:?}");
    }
}
