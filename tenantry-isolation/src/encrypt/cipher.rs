//! Field ciphers.
//!
//! [`AesGcmCipher`] is deterministic: the nonce is derived from the
//! plaintext, so the same value always encrypts to the same text and
//! equality filters on encrypted columns keep working.
//!
//! ```rust
//! use tenantry_isolation::{AesGcmCipher, Cipher};
//!
//! let cipher = AesGcmCipher::new(&[7u8; 32]).unwrap();
//! let sealed = cipher.encrypt("555-0100").unwrap();
//!
//! assert_eq!(sealed, cipher.encrypt("555-0100").unwrap());
//! assert_eq!(cipher.decrypt(&sealed).unwrap(), "555-0100");
//! ```

use crate::errors;
use aes_gcm::Aes256Gcm;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::sync::Arc;
use tenantry_query::QueryResult;

type HmacSha256 = Hmac<Sha256>;

/// Length of an AES-256 key in bytes.
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypts and decrypts column values.
pub trait Cipher: Send + Sync {
    /// Encrypt a plaintext value.
    fn encrypt(&self, plaintext: &str) -> QueryResult<String>;

    /// Decrypt a value produced by [`Cipher::encrypt`].
    fn decrypt(&self, ciphertext: &str) -> QueryResult<String>;
}

/// Type alias for cipher functions.
pub type CipherFn = Arc<dyn Fn(&str) -> QueryResult<String> + Send + Sync>;

/// A cipher built from a pair of functions.
pub struct FnCipher {
    encrypt_fn: CipherFn,
    decrypt_fn: CipherFn,
}

impl FnCipher {
    /// Wrap an encrypt and a decrypt function.
    pub fn new<E, D>(encrypt: E, decrypt: D) -> Self
    where
        E: Fn(&str) -> QueryResult<String> + Send + Sync + 'static,
        D: Fn(&str) -> QueryResult<String> + Send + Sync + 'static,
    {
        Self {
            encrypt_fn: Arc::new(encrypt),
            decrypt_fn: Arc::new(decrypt),
        }
    }
}

impl std::fmt::Debug for FnCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCipher").finish()
    }
}

impl Cipher for FnCipher {
    fn encrypt(&self, plaintext: &str) -> QueryResult<String> {
        (self.encrypt_fn)(plaintext)
    }

    fn decrypt(&self, ciphertext: &str) -> QueryResult<String> {
        (self.decrypt_fn)(ciphertext)
    }
}

/// Deterministic AES-256-GCM cipher.
///
/// Output is `base64(nonce || ciphertext || tag)` where the nonce is the
/// first 12 bytes of an HMAC-SHA256 of the plaintext. The encryption key
/// and the nonce key are both derived from the master key.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
    nonce_key: Vec<u8>,
}

impl AesGcmCipher {
    /// Create a cipher from a 32-byte master key.
    pub fn new(key: &[u8]) -> QueryResult<Self> {
        if key.len() != KEY_LEN {
            return Err(errors::encryption_failed(format!(
                "key must be {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }

        let enc_key = hmac_sha256(key, b"tenantry:encrypt")?;
        let nonce_key = hmac_sha256(key, b"tenantry:nonce")?;
        let cipher = Aes256Gcm::new_from_slice(&enc_key)
            .map_err(|e| errors::encryption_failed(format!("invalid key: {}", e)))?;

        Ok(Self { cipher, nonce_key })
    }

    /// Create a cipher from a base64 encoded 32-byte key.
    pub fn from_base64_key(key: &str) -> QueryResult<Self> {
        let bytes = STANDARD
            .decode(key.trim())
            .map_err(|e| errors::encryption_failed(format!("invalid base64 key: {}", e)))?;
        Self::new(&bytes)
    }

    /// Generate a random base64 encoded key.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill(&mut key[..]);
        STANDARD.encode(key)
    }

    fn nonce(&self, plaintext: &str) -> QueryResult<Vec<u8>> {
        let mut digest = hmac_sha256(&self.nonce_key, plaintext.as_bytes())?;
        digest.truncate(NONCE_LEN);
        Ok(digest)
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> QueryResult<String> {
        let nonce = self.nonce(plaintext)?;
        let sealed = self
            .cipher
            .encrypt(GenericArray::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| errors::encryption_failed("encryption failed"))?;

        let mut out = nonce;
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> QueryResult<String> {
        let bytes = STANDARD
            .decode(ciphertext)
            .map_err(|e| errors::encryption_failed(format!("malformed ciphertext: {}", e)))?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(errors::encryption_failed("ciphertext too short"));
        }

        let (nonce, sealed) = bytes.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(GenericArray::from_slice(nonce), sealed)
            .map_err(|_| errors::encryption_failed("decryption failed"))?;
        String::from_utf8(plain)
            .map_err(|e| errors::encryption_failed(format!("decrypted value is not UTF-8: {}", e)))
    }
}

fn hmac_sha256(key: &[u8], label: &[u8]) -> QueryResult<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| errors::encryption_failed(format!("invalid key: {}", e)))?;
    mac.update(label);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tenantry_query::ErrorCode;

    fn cipher() -> AesGcmCipher {
        AesGcmCipher::new(&[42u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn test_deterministic() {
        let cipher = cipher();
        let a = cipher.encrypt("alice@example.com").unwrap();
        let b = cipher.encrypt("alice@example.com").unwrap();
        let c = cipher.encrypt("bob@example.com").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, "alice@example.com");
        assert_eq!(cipher.decrypt(&a).unwrap(), "alice@example.com");
    }

    #[test]
    fn test_keys_are_independent() {
        let other = AesGcmCipher::new(&[1u8; KEY_LEN]).unwrap();
        let sealed = cipher().encrypt("secret").unwrap();

        assert_ne!(other.encrypt("secret").unwrap(), sealed);
        let err = other.decrypt(&sealed).unwrap_err();
        assert_eq!(err.code, ErrorCode::EncryptionFailed);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(AesGcmCipher::new(&[0u8; 16]).is_err());
        assert!(cipher().decrypt("not base64!").is_err());
        assert!(cipher().decrypt(&STANDARD.encode([0u8; 8])).is_err());
    }

    #[test]
    fn test_base64_key() {
        let key = AesGcmCipher::generate_key();
        let cipher = AesGcmCipher::from_base64_key(&key).unwrap();
        let sealed = cipher.encrypt("x").unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "x");

        assert!(AesGcmCipher::from_base64_key("c2hvcnQ=").is_err());
    }

    #[test]
    fn test_fn_cipher() {
        let cipher = FnCipher::new(
            |plain| Ok(plain.chars().rev().collect()),
            |sealed| Ok(sealed.chars().rev().collect()),
        );
        assert_eq!(cipher.encrypt("abc").unwrap(), "cba");
        assert_eq!(cipher.decrypt("cba").unwrap(), "abc");
    }
}
