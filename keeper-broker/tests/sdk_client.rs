#[path = "support/mod.rs"]
mod support;

use keeper_sdk::{HttpClient, SdkError, VersionState};
use time::{Duration, OffsetDateTime};
use tokio::net::TcpListener;

async fn spawn_server() -> String {
    let (app, _) = support::app().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn sdk_drives_the_full_lifecycle() {
    let base = spawn_server().await;
    let mut client = HttpClient::new(&base).unwrap();
    let registered = client.register("sdk-user", "s3cret-pass").await.unwrap();
    assert_eq!(client.token(), Some(registered.token.as_str()));

    let expires = OffsetDateTime::now_utc() + Duration::hours(1);
    let first = client
        .save_secret("api/key", "first", b"one", expires, None)
        .await
        .unwrap();
    assert_eq!(first.version, 1);
    let second = client
        .save_secret("api/key", "second", b"two", expires, None)
        .await
        .unwrap();
    assert_eq!(second.version, 2);

    let secret = client.get_secret("api/key").await.unwrap();
    assert_eq!(secret.value, b"two");
    assert_eq!(secret.description, "second");
    assert_eq!(client.list_secrets().await.unwrap(), vec!["api/key"]);

    client.delete_secret("api/key").await.unwrap();
    let err = client.get_secret("api/key").await.unwrap_err();
    assert!(err.is_not_found(), "{err}");

    client.undelete_secret("api/key", 2).await.unwrap();
    assert_eq!(client.get_secret("api/key").await.unwrap().value, b"two");

    let versions = client.list_versions("api/key").await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].state, VersionState::SoftDeleted);
    assert_eq!(versions[1].state, VersionState::Active);

    client.destroy_secret("api/key").await.unwrap();
    let versions = client.list_versions("api/key").await.unwrap();
    assert!(
        versions
            .iter()
            .all(|entry| entry.state == VersionState::Destroyed)
    );

    client.delete_metadata("api/key").await.unwrap();
    assert!(client.list_secrets().await.unwrap().is_empty());
}

#[tokio::test]
async fn sdk_login_and_errors() {
    let base = spawn_server().await;
    let mut first = HttpClient::new(&base).unwrap();
    first.register("returning", "pw-123").await.unwrap();

    let mut second = HttpClient::new(&base).unwrap();
    let err = second.login("returning", "wrong").await.unwrap_err();
    match err {
        SdkError::Api { status, error, .. } => {
            assert_eq!(status, 401);
            assert_eq!(error, "unauthorized");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(second.token().is_none());

    second.login("returning", "pw-123").await.unwrap();
    assert_eq!(second.token(), first.token());

    let stale = HttpClient::new(&base).unwrap().with_token("not-a-token");
    let err = stale.list_secrets().await.unwrap_err();
    assert_eq!(err.status(), Some(401));
}
