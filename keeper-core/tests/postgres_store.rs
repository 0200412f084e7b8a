#![cfg(feature = "postgres")]

//! Runs against a live database only when `KEEPER_TEST_DATABASE_URL` is set.

use keeper_core::{
    CredentialStore, CryptoEngine, NewAccessToken, PgStore, SaveSecret, VaultService,
};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

async fn store() -> Option<PgStore> {
    let url = std::env::var("KEEPER_TEST_DATABASE_URL").ok()?;
    Some(PgStore::connect(&url, 4).await.expect("connect"))
}

#[tokio::test]
async fn credentials_round_trip() {
    let Some(store) = store().await else {
        return;
    };
    let login = format!("user-{}", Uuid::new_v4());

    let mut tx = CredentialStore::begin(&store).await.unwrap();
    let user = tx.create_user(&login, "hash").await.unwrap();
    let now = OffsetDateTime::now_utc();
    tx.insert_token(NewAccessToken {
        user_id: user.id,
        token: "token-a".into(),
        expires_at: now + Duration::hours(1),
    })
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let mut tx = CredentialStore::begin(&store).await.unwrap();
    assert!(tx.create_user(&login, "hash").await.is_err());
    drop(tx);

    let mut tx = CredentialStore::begin(&store).await.unwrap();
    let found = tx.find_user_by_login(&login).await.unwrap().unwrap();
    assert_eq!(found.id, user.id);
    let token = tx.find_valid_token(user.id, now).await.unwrap().unwrap();
    assert_eq!(token.token, "token-a");
}

#[tokio::test]
async fn vault_lifecycle_on_postgres() {
    let Some(store) = store().await else {
        return;
    };
    let mut tx = CredentialStore::begin(&store).await.unwrap();
    let user = tx
        .create_user(&format!("vault-{}", Uuid::new_v4()), "hash")
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let engine = Arc::new(CryptoEngine::new(&[1u8; 32]).unwrap());
    let vault = VaultService::new(Arc::new(store), engine);
    let save = |payload: &[u8]| SaveSecret {
        path: "db/prod".into(),
        description: String::new(),
        payload: payload.to_vec(),
        expired_at: OffsetDateTime::now_utc() + Duration::hours(1),
        external_name: None,
    };

    assert_eq!(vault.save(user.id, save(b"X")).await.unwrap().version, 1);
    assert_eq!(vault.save(user.id, save(b"Y")).await.unwrap().version, 2);
    assert_eq!(vault.get(user.id, "db/prod").await.unwrap().value, b"Y");

    vault.delete(user.id, "db/prod").await.unwrap();
    assert!(vault.get(user.id, "db/prod").await.unwrap_err().is_not_found());
    vault.undelete(user.id, "db/prod", 1).await.unwrap();
    assert_eq!(vault.get(user.id, "db/prod").await.unwrap().value, b"X");

    vault.destroy(user.id, "db/prod").await.unwrap();
    assert!(
        vault
            .undelete(user.id, "db/prod", 1)
            .await
            .unwrap_err()
            .is_not_found()
    );
}
