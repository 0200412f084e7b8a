use std::fmt;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use keeper_core::{AuthFailure, Error, Result, UserId};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::config::SecurityConfig;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user_id: UserId,
    iat: i64,
    exp: i64,
    jti: String,
}

/// Signed session token as handed to a client.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// HS256 session tokens bound to a user id.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(config: &SecurityConfig) -> Result<Self> {
        let secret = config.signing_key.trim();
        if secret.is_empty() {
            return Err(Error::Config("signing key must not be empty".into()));
        }
        if config.token_ttl_secs == 0 {
            return Err(Error::Config("token ttl must be greater than zero".into()));
        }
        let ttl = i64::try_from(config.token_ttl_secs)
            .map(Duration::seconds)
            .map_err(|_| Error::Config("token ttl is out of range".into()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user_id: UserId) -> Result<IssuedToken> {
        self.issue_at(user_id, OffsetDateTime::now_utc())
    }

    pub(crate) fn issue_at(&self, user_id: UserId, now: OffsetDateTime) -> Result<IssuedToken> {
        let expires_at = now
            .checked_add(self.ttl)
            .ok_or_else(|| Error::Config("token expiry overflows".into()))?;
        let claims = Claims {
            user_id,
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| Error::Config(format!("failed to sign token: {err}")))?;
        Ok(IssuedToken { token, expires_at })
    }

    pub fn validate(&self, token: &str) -> Result<UserId> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims.user_id)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => Error::Unauthenticated(AuthFailure::ExpiredToken),
                _ => Error::Unauthenticated(AuthFailure::InvalidToken),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(key: &str, ttl: u64) -> SecurityConfig {
        SecurityConfig {
            signing_key: key.into(),
            token_ttl_secs: ttl,
            ..SecurityConfig::default()
        }
    }

    #[test]
    fn issued_tokens_validate_to_their_user() {
        let service = TokenService::new(&config("signing-secret", 60)).unwrap();
        let first = service.issue(42).unwrap();
        let second = service.issue(42).unwrap();
        assert_ne!(first.token, second.token);
        assert_eq!(service.validate(&first.token).unwrap(), 42);
        assert!(first.expires_at > OffsetDateTime::now_utc());
    }

    #[test]
    fn construction_requires_key_and_ttl() {
        assert!(matches!(
            TokenService::new(&config("  ", 60)),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            TokenService::new(&config("k", 0)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn expired_tokens_are_reported_as_expired() {
        let service = TokenService::new(&config("signing-secret", 60)).unwrap();
        let issued = service
            .issue_at(7, OffsetDateTime::now_utc() - Duration::hours(1))
            .unwrap();
        assert_eq!(
            service.validate(&issued.token),
            Err(Error::Unauthenticated(AuthFailure::ExpiredToken))
        );
    }

    #[test]
    fn foreign_keys_and_algorithms_are_rejected() {
        let service = TokenService::new(&config("signing-secret", 60)).unwrap();
        let other = TokenService::new(&config("another-secret", 60)).unwrap();
        let issued = other.issue(1).unwrap();
        assert_eq!(
            service.validate(&issued.token),
            Err(Error::Unauthenticated(AuthFailure::InvalidToken))
        );

        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            user_id: 1,
            iat: now.unix_timestamp(),
            exp: (now + Duration::minutes(5)).unix_timestamp(),
            jti: "x".into(),
        };
        let hs512 = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"signing-secret"),
        )
        .unwrap();
        assert_eq!(
            service.validate(&hs512),
            Err(Error::Unauthenticated(AuthFailure::InvalidToken))
        );
        assert_eq!(
            service.validate("not-a-token"),
            Err(Error::Unauthenticated(AuthFailure::InvalidToken))
        );
    }
}
