//! AES-256-GCM sealing of secret payloads.
//!
//! Sealed blobs are laid out as `nonce (12) || ciphertext || tag (16)`.

use crate::errors::{Error, Result};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Encrypts and decrypts payloads with a single data-encryption key.
pub struct CryptoEngine {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl CryptoEngine {
    pub fn new(key_bytes: &[u8]) -> Result<Self> {
        if key_bytes.len() != KEY_LEN {
            return Err(Error::Config(format!(
                "data encryption key must be {KEY_LEN} bytes, got {}",
                key_bytes.len()
            )));
        }
        let key = UnboundKey::new(&aead::AES_256_GCM, key_bytes)
            .map_err(|_| Error::Config("invalid data encryption key".into()))?;
        Ok(Self {
            key: LessSafeKey::new(key),
            rng: SystemRandom::new(),
        })
    }

    /// Builds an engine from the hex form used in configuration.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|_| Error::Config("data encryption key is not valid hex".into()))?;
        Self::new(&bytes)
    }

    pub fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| Error::Crypto("rng unavailable".into()))?;

        let mut in_out = Vec::with_capacity(plaintext.len() + TAG_LEN);
        in_out.extend_from_slice(plaintext);
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| Error::Crypto("seal failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    pub fn decode(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(Error::validation("ciphertext", "shorter than nonce"));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce)
            .map_err(|_| Error::validation("ciphertext", "invalid nonce"))?;

        let mut buffer = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut buffer)
            .map_err(|_| Error::Crypto("integrity check failed".into()))?;
        Ok(plaintext.to_vec())
    }
}

impl fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("algorithm", &"AES-256-GCM")
            .field("key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_engine() -> CryptoEngine {
        CryptoEngine::new(&[0u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let engine = zero_engine();
        let sealed = engine.encode(b"secret data").expect("encode");
        assert_eq!(sealed.len(), 39);
        assert_eq!(engine.decode(&sealed).expect("decode"), b"secret data");
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let engine = zero_engine();
        let a = engine.encode(b"same").unwrap();
        let b = engine.encode(b"same").unwrap();
        assert_ne!(a, b);
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn tamper_detection() {
        let engine = zero_engine();
        let sealed = engine.encode(b"critical").unwrap();
        for idx in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[idx] ^= 0x01;
            let err = engine.decode(&tampered).unwrap_err();
            assert!(matches!(err, Error::Crypto(_)), "byte {idx}: {err:?}");
        }
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = zero_engine().encode(b"payload").unwrap();
        let other = CryptoEngine::new(&[7u8; KEY_LEN]).unwrap();
        assert!(matches!(other.decode(&sealed), Err(Error::Crypto(_))));
    }

    #[test]
    fn short_blob_is_rejected() {
        let err = zero_engine().decode(&[0u8; 5]).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn empty_payload_seals_to_nonce_and_tag() {
        let engine = zero_engine();
        let sealed = engine.encode(b"").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + TAG_LEN);
        assert!(engine.decode(&sealed).unwrap().is_empty());
    }

    #[test]
    fn hex_key_validation() {
        assert!(CryptoEngine::from_hex(&"00".repeat(KEY_LEN)).is_ok());
        assert!(matches!(
            CryptoEngine::from_hex("zz"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            CryptoEngine::from_hex(&"00".repeat(16)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn debug_redacts_key() {
        let rendered = format!("{:?}", zero_engine());
        assert!(rendered.contains("redacted"));
    }
}
