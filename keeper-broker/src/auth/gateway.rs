use std::sync::Arc;

use keeper_core::{AccessToken, AuthFailure, CredentialStore, Error, NewAccessToken, Result};
use time::OffsetDateTime;
use tracing::{debug, info};

use super::password::PasswordService;
use super::token::TokenService;

pub const MAX_LOGIN_LEN: usize = 128;
pub const MAX_PASSWORD_BYTES: usize = 1024;

fn validate_credentials(login: &str, password: &str) -> Result<()> {
    if login.trim().is_empty() {
        return Err(Error::validation("login", "must not be empty"));
    }
    if login.chars().count() > MAX_LOGIN_LEN {
        return Err(Error::validation(
            "login",
            format!("must be at most {MAX_LOGIN_LEN} characters"),
        ));
    }
    if password.is_empty() {
        return Err(Error::validation("password", "must not be empty"));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(Error::validation(
            "password",
            format!("must be at most {MAX_PASSWORD_BYTES} bytes"),
        ));
    }
    Ok(())
}

/// Registration and login on top of a [`CredentialStore`].
#[derive(Clone)]
pub struct AuthGateway {
    store: Arc<dyn CredentialStore>,
    passwords: PasswordService,
    tokens: TokenService,
}

impl AuthGateway {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        passwords: PasswordService,
        tokens: TokenService,
    ) -> Self {
        Self {
            store,
            passwords,
            tokens,
        }
    }

    pub async fn register(&self, login: &str, password: &str) -> Result<AccessToken> {
        validate_credentials(login, password)?;
        let password_hash = self.passwords.hash(password).await?;

        let mut tx = self.store.begin().await?;
        let user = tx.create_user(login, &password_hash).await?;
        let issued = self.tokens.issue(user.id)?;
        let token = tx
            .insert_token(NewAccessToken {
                user_id: user.id,
                token: issued.token,
                expires_at: issued.expires_at,
            })
            .await?;
        tx.commit().await?;

        info!(user_id = user.id, "user registered");
        Ok(token)
    }

    pub async fn login(&self, login: &str, password: &str) -> Result<AccessToken> {
        if login.is_empty() || password.is_empty() {
            return Err(Error::Unauthenticated(AuthFailure::InvalidCredentials));
        }

        let mut tx = self.store.begin().await?;
        let user = tx
            .find_user_by_login(login)
            .await?
            .ok_or(Error::Unauthenticated(AuthFailure::InvalidCredentials))?;
        if !self.passwords.verify(password, &user.password_hash).await? {
            debug!(user_id = user.id, "password mismatch");
            return Err(Error::Unauthenticated(AuthFailure::InvalidCredentials));
        }

        let now = OffsetDateTime::now_utc();
        let token = match tx.find_valid_token(user.id, now).await? {
            Some(existing) => {
                debug!(user_id = user.id, token_id = existing.id, "reusing session token");
                existing
            }
            None => {
                let issued = self.tokens.issue(user.id)?;
                tx.insert_token(NewAccessToken {
                    user_id: user.id,
                    token: issued.token,
                    expires_at: issued.expires_at,
                })
                .await?
            }
        };
        tx.commit().await?;

        info!(user_id = user.id, "user logged in");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PasswordConfig, SecurityConfig};
    use keeper_core::MemoryStore;

    fn gateway() -> (AuthGateway, TokenService) {
        let tokens = TokenService::new(&SecurityConfig {
            signing_key: "gateway-test".into(),
            token_ttl_secs: 300,
            ..SecurityConfig::default()
        })
        .unwrap();
        let passwords = PasswordService::new(&PasswordConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();
        let gateway = AuthGateway::new(Arc::new(MemoryStore::new()), passwords, tokens.clone());
        (gateway, tokens)
    }

    #[tokio::test]
    async fn register_then_login_reuses_the_token() {
        let (gateway, tokens) = gateway();
        let registered = gateway.register("alice", "pw").await.unwrap();
        let user_id = tokens.validate(&registered.token).unwrap();
        assert_eq!(user_id, registered.user_id);

        let first = gateway.login("alice", "pw").await.unwrap();
        let second = gateway.login("alice", "pw").await.unwrap();
        assert_eq!(first.token, registered.token);
        assert_eq!(second.token, registered.token);
        assert_eq!(tokens.validate(&second.token).unwrap(), user_id);
    }

    #[tokio::test]
    async fn wrong_password_matches_unknown_login() {
        let (gateway, _) = gateway();
        gateway.register("bob", "right").await.unwrap();
        let wrong = gateway.login("bob", "wrong").await.unwrap_err();
        let unknown = gateway.login("nobody", "right").await.unwrap_err();
        assert_eq!(wrong, unknown);
        assert_eq!(
            wrong,
            Error::Unauthenticated(AuthFailure::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn duplicate_and_invalid_registrations_fail() {
        let (gateway, _) = gateway();
        gateway.register("carol", "pw").await.unwrap();
        assert!(matches!(
            gateway.register("carol", "other").await,
            Err(Error::Validation { field: "login", .. })
        ));
        assert!(matches!(
            gateway.register("", "pw").await,
            Err(Error::Validation { field: "login", .. })
        ));
        assert!(matches!(
            gateway.register("dave", "").await,
            Err(Error::Validation { field: "password", .. })
        ));
        assert!(matches!(
            gateway.register(&"x".repeat(MAX_LOGIN_LEN + 1), "pw").await,
            Err(Error::Validation { field: "login", .. })
        ));
        assert!(matches!(
            gateway
                .register("erin", &"p".repeat(MAX_PASSWORD_BYTES + 1))
                .await,
            Err(Error::Validation { field: "password", .. })
        ));
    }
}
